//! Error types for the MIRA pipeline

use std::fmt;

use thiserror::Error;

use crate::escalation::EscalationDecision;

/// Result type alias for pipeline operations
pub type MiraResult<T> = Result<T, MiraError>;

/// External collaborator a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamStage {
    SafetyAgent,
    Reflection,
    Identity,
}

impl fmt::Display for UpstreamStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpstreamStage::SafetyAgent => "safety agent",
            UpstreamStage::Reflection => "reflection model",
            UpstreamStage::Identity => "identity service",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while processing a message
#[derive(Error, Debug)]
pub enum MiraError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("{stage} unavailable: {detail}")]
    UpstreamUnavailable { stage: UpstreamStage, detail: String },

    #[error("{stage} returned a malformed payload")]
    UpstreamMalformed { stage: UpstreamStage, raw: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MiraError {
    pub fn unavailable(stage: UpstreamStage, detail: impl Into<String>) -> Self {
        MiraError::UpstreamUnavailable {
            stage,
            detail: detail.into(),
        }
    }

    pub fn malformed(stage: UpstreamStage, raw: impl Into<String>) -> Self {
        MiraError::UpstreamMalformed {
            stage,
            raw: raw.into(),
        }
    }

    /// HTTP-equivalent status for the gateway.
    pub fn status_code(&self) -> u16 {
        match self {
            MiraError::Validation(_) => 400,
            MiraError::Auth(_) => 401,
            MiraError::UpstreamUnavailable { .. } | MiraError::UpstreamMalformed { .. } => 502,
            MiraError::Persistence(_) | MiraError::Config(_) | MiraError::Internal(_) => 500,
        }
    }

    /// Raw upstream payload kept for diagnostics, if any.
    pub fn upstream_payload(&self) -> Option<&str> {
        match self {
            MiraError::UpstreamUnavailable { detail, .. } => Some(detail),
            MiraError::UpstreamMalformed { raw, .. } => Some(raw),
            _ => None,
        }
    }
}

impl From<sled::Error> for MiraError {
    fn from(err: sled::Error) -> Self {
        MiraError::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for MiraError {
    fn from(err: serde_json::Error) -> Self {
        MiraError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for MiraError {
    fn from(err: config::ConfigError) -> Self {
        MiraError::Config(err.to_string())
    }
}

/// A pipeline run that ended in the `Failed` state.
///
/// `escalation` carries the decision computed from local evidence before the failure, so
/// callers can still report a crisis when a downstream collaborator broke.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct PipelineError {
    #[source]
    pub error: MiraError,
    pub escalation: Option<EscalationDecision>,
}

impl PipelineError {
    pub fn new(error: MiraError) -> Self {
        Self {
            error,
            escalation: None,
        }
    }

    pub fn with_escalation(error: MiraError, escalation: EscalationDecision) -> Self {
        Self {
            error,
            escalation: Some(escalation),
        }
    }
}

impl From<MiraError> for PipelineError {
    fn from(error: MiraError) -> Self {
        Self::new(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn pipeline_error_displays_and_chains_the_cause() {
        let err = PipelineError::new(MiraError::Validation("Message required".into()));
        assert_eq!(err.to_string(), "Validation error: Message required");
        let source = err.source().expect("source");
        assert_eq!(source.to_string(), "Validation error: Message required");
    }
}
