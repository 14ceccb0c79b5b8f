//! Escalation decision: folds local keyword evidence and the remote agent's verdict into one
//! crisis decision (OR-combination). A local match is never downgraded by the remote side.

use serde::Serialize;

use crate::safety_agent::SafetyVerdict;
use crate::types::{EscalationAction, Severity};

/// Severity assumed for a local match when nothing stronger is known.
pub const LOCAL_MATCH_SEVERITY: Severity = Severity::High;
/// Score reported for a local match when the remote gave none.
pub const LOCAL_MATCH_SCORE: f64 = 0.95;

/// Per-request evidence. Never persisted as-is.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrisisEvidence {
    pub keyword_matches: Vec<String>,
    pub remote_flag: bool,
    pub remote_severity: Severity,
    pub remote_score: Option<f64>,
    pub remote_contact_notified: bool,
    pub remote_call_initiated: bool,
}

impl CrisisEvidence {
    pub fn local(keyword_matches: Vec<String>) -> Self {
        Self {
            keyword_matches,
            ..Self::default()
        }
    }

    pub fn with_remote(mut self, verdict: &SafetyVerdict) -> Self {
        self.remote_flag = verdict.crisis_detected;
        self.remote_severity = verdict.severity;
        self.remote_score = verdict.severity_score;
        self.remote_contact_notified = verdict.contact_notified;
        self.remote_call_initiated = verdict.call_initiated;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationDecision {
    pub crisis_detected: bool,
    pub severity: Severity,
    pub severity_score: Option<f64>,
    pub matched_keywords: Vec<String>,
    pub action: EscalationAction,
    /// False when no action is needed or the agent already notified a contact.
    pub action_requested: bool,
    pub contact_notified: bool,
}

impl EscalationDecision {
    pub fn none() -> Self {
        Self {
            crisis_detected: false,
            severity: Severity::None,
            severity_score: None,
            matched_keywords: Vec::new(),
            action: EscalationAction::None,
            action_requested: false,
            contact_notified: false,
        }
    }
}

/// `high | critical → call`, `moderate → sms`, otherwise nothing.
pub fn action_for(severity: Severity) -> EscalationAction {
    match severity {
        Severity::High | Severity::Critical => EscalationAction::Call,
        Severity::Moderate => EscalationAction::Sms,
        Severity::None | Severity::Low => EscalationAction::None,
    }
}

pub fn decide(evidence: &CrisisEvidence) -> EscalationDecision {
    let local_hit = !evidence.keyword_matches.is_empty();

    let (crisis_detected, severity, severity_score) = if local_hit {
        (
            true,
            LOCAL_MATCH_SEVERITY.max(evidence.remote_severity),
            evidence.remote_score.or(Some(LOCAL_MATCH_SCORE)),
        )
    } else if evidence.remote_flag {
        let severity = if evidence.remote_severity == Severity::None {
            LOCAL_MATCH_SEVERITY
        } else {
            evidence.remote_severity
        };
        (true, severity, evidence.remote_score)
    } else {
        (false, evidence.remote_severity, evidence.remote_score)
    };

    if !crisis_detected {
        return EscalationDecision {
            severity,
            severity_score,
            contact_notified: evidence.remote_contact_notified,
            ..EscalationDecision::none()
        };
    }

    let (action, action_requested) = if evidence.remote_contact_notified {
        let done = if evidence.remote_call_initiated {
            EscalationAction::Call
        } else {
            EscalationAction::Sms
        };
        (done, false)
    } else {
        let action = action_for(severity);
        (action, action != EscalationAction::None)
    };

    EscalationDecision {
        crisis_detected,
        severity,
        severity_score,
        matched_keywords: evidence.keyword_matches.clone(),
        action,
        action_requested,
        contact_notified: evidence.remote_contact_notified,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(flag: bool, severity: Severity) -> CrisisEvidence {
        CrisisEvidence {
            remote_flag: flag,
            remote_severity: severity,
            ..CrisisEvidence::default()
        }
    }

    #[test]
    fn local_match_defaults_to_high_and_call() {
        let d = decide(&CrisisEvidence::local(vec!["end my life".into()]));
        assert!(d.crisis_detected);
        assert_eq!(d.severity, Severity::High);
        assert_eq!(d.severity_score, Some(LOCAL_MATCH_SCORE));
        assert_eq!(d.action, EscalationAction::Call);
        assert!(d.action_requested);
        assert_eq!(d.matched_keywords, vec!["end my life".to_string()]);
    }

    #[test]
    fn remote_cannot_downgrade_local_match() {
        let mut e = remote(false, Severity::None);
        e.keyword_matches = vec!["hopeless".into()];
        e.remote_score = Some(0.1);
        let d = decide(&e);
        assert!(d.crisis_detected);
        assert_eq!(d.severity, Severity::High);
        assert_eq!(d.severity_score, Some(0.1));
    }

    #[test]
    fn higher_remote_severity_wins_over_local_default() {
        let mut e = remote(true, Severity::Critical);
        e.keyword_matches = vec!["suicide".into()];
        assert_eq!(decide(&e).severity, Severity::Critical);
    }

    #[test]
    fn remote_only_flag_uses_remote_severity() {
        let d = decide(&remote(true, Severity::Moderate));
        assert!(d.crisis_detected);
        assert_eq!(d.severity, Severity::Moderate);
        assert_eq!(d.action, EscalationAction::Sms);
    }

    #[test]
    fn remote_flag_without_severity_is_treated_as_high() {
        let d = decide(&remote(true, Severity::None));
        assert_eq!(d.severity, Severity::High);
        assert_eq!(d.action, EscalationAction::Call);
    }

    #[test]
    fn no_evidence_no_crisis() {
        let d = decide(&CrisisEvidence::default());
        assert_eq!(d, EscalationDecision::none());
        let d = decide(&remote(false, Severity::Low));
        assert!(!d.crisis_detected);
        assert_eq!(d.action, EscalationAction::None);
        assert!(!d.action_requested);
    }

    #[test]
    fn already_notified_is_not_requested_again() {
        let mut e = remote(true, Severity::High);
        e.remote_contact_notified = true;
        e.remote_call_initiated = true;
        let d = decide(&e);
        assert_eq!(d.action, EscalationAction::Call);
        assert!(!d.action_requested);
        assert!(d.contact_notified);

        e.remote_call_initiated = false;
        let d = decide(&e);
        assert_eq!(d.action, EscalationAction::Sms);
        assert!(!d.action_requested);
    }

    #[test]
    fn action_mapping() {
        assert_eq!(action_for(Severity::Critical), EscalationAction::Call);
        assert_eq!(action_for(Severity::High), EscalationAction::Call);
        assert_eq!(action_for(Severity::Moderate), EscalationAction::Sms);
        assert_eq!(action_for(Severity::Low), EscalationAction::None);
        assert_eq!(action_for(Severity::None), EscalationAction::None);
    }
}
