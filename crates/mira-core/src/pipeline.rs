//! Pipeline orchestrator: runs one message through intake, local assessment, escalation,
//! reflection (or the safety agent), and the ledger.
//!
//! Stage trail: `Received → Normalized → Assessed → (CrisisPath | ReflectionPath) →
//! Persisted → Responded`. `Failed` is reachable from `Received` (validation) and from
//! `Assessed` (safety agent unavailable or malformed). The local keyword scan and the
//! escalation decision run for every valid message, whatever happens downstream.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::{MiraConfig, StorageBackend};
use crate::crisis::CrisisLexicon;
use crate::error::{MiraError, MiraResult, PipelineError, UpstreamStage};
use crate::escalation::{decide, CrisisEvidence, EscalationDecision};
use crate::few_shot::{load_examples, FewShotLibrary};
use crate::generator::{ChatCompletionModel, LlmMode, MockModel, ReflectionModel};
use crate::intake::normalize;
use crate::ledger::{ConversationLedger, LedgerStore, MemoryLedgerStore, PersistenceReport, SledLedgerStore};
use crate::reflection::{from_agent_reply, Reflection, ReflectionGenerator};
use crate::safety_agent::{HttpSafetyAgent, SafetyAgent, SafetyRequest, SafetyVerdict};
use crate::sentiment::{SentimentLexicon, SentimentScorer};
use crate::types::{
    Channel, CrisisEvent, EmotionAssessment, Identity, Message, ReflectionResult, ResponsePayload, Sender,
};

/// Characters of the user text kept in a crisis event excerpt.
pub const EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Received,
    Normalized,
    Assessed,
    CrisisPath,
    ReflectionPath,
    Persisted,
    Responded,
    Failed,
}

/// Everything one successful run produced.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub payload: ResponsePayload,
    pub assessment: EmotionAssessment,
    pub reflection: ReflectionResult,
    pub decision: EscalationDecision,
    pub crisis_event: Option<CrisisEvent>,
    pub stages: Vec<Stage>,
    pub persistence: PersistenceReport,
}

/// External collaborators the pipeline talks to.
pub struct Collaborators {
    pub model: Arc<dyn ReflectionModel>,
    pub safety_agent: Option<Arc<dyn SafetyAgent>>,
    pub store: Arc<dyn LedgerStore>,
}

impl Collaborators {
    /// Production collaborators for `cfg`.
    pub fn from_config(cfg: &MiraConfig) -> MiraResult<Self> {
        let model: Arc<dyn ReflectionModel> = match cfg.reflection.mode {
            LlmMode::Mock => Arc::new(MockModel),
            LlmMode::Live => Arc::new(ChatCompletionModel::new(&cfg.reflection)?),
        };
        let safety_agent = cfg
            .safety_agent
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .map(|u| Arc::new(HttpSafetyAgent::new(u)) as Arc<dyn SafetyAgent>);
        let store: Arc<dyn LedgerStore> = match cfg.storage {
            StorageBackend::Sled => Arc::new(SledLedgerStore::open(Some(cfg.ledger_path()))?),
            StorageBackend::Memory => Arc::new(MemoryLedgerStore::new()),
        };
        Ok(Self {
            model,
            safety_agent,
            store,
        })
    }
}

pub struct Pipeline {
    lexicon: CrisisLexicon,
    scorer: SentimentScorer,
    reflection: ReflectionGenerator,
    safety_agent: Option<Arc<dyn SafetyAgent>>,
    agent_timeout: Duration,
    ledger: ConversationLedger,
    few_shot_path: Option<PathBuf>,
    few_shot_limit: usize,
}

impl Pipeline {
    pub fn from_config(cfg: &MiraConfig) -> MiraResult<Self> {
        Self::new(cfg, Collaborators::from_config(cfg)?)
    }

    /// Builds the pipeline from config data (phrases, lexicon, few-shot set) and the given collaborators.
    pub fn new(cfg: &MiraConfig, collaborators: Collaborators) -> MiraResult<Self> {
        let lexicon = CrisisLexicon::new(&cfg.crisis_phrases);
        if lexicon.is_empty() {
            tracing::warn!(target: "mira::pipeline", "crisis phrase list is empty; only the safety agent can flag a crisis");
        }
        let sentiment = match &cfg.sentiment_lexicon_path {
            Some(p) => SentimentLexicon::from_path(p)?,
            None => SentimentLexicon::builtin(),
        };
        let few_shot = match &cfg.few_shot_path {
            Some(p) => FewShotLibrary::new(load_examples(p, cfg.few_shot_limit)),
            None => FewShotLibrary::empty(),
        };

        tracing::info!(
            target: "mira::pipeline",
            phrases = lexicon.phrases().len(),
            lexicon_tokens = sentiment.len(),
            few_shot = few_shot.snapshot().len(),
            safety_agent = collaborators.safety_agent.is_some(),
            "pipeline ready"
        );

        Ok(Self {
            lexicon,
            scorer: SentimentScorer::new(sentiment),
            reflection: ReflectionGenerator::new(collaborators.model, Arc::new(few_shot), cfg.reflection.timeout()),
            safety_agent: collaborators.safety_agent,
            agent_timeout: cfg.safety_agent.timeout(),
            ledger: ConversationLedger::new(collaborators.store),
            few_shot_path: cfg.few_shot_path.clone(),
            few_shot_limit: cfg.few_shot_limit,
        })
    }

    pub fn ledger(&self) -> &ConversationLedger {
        &self.ledger
    }

    /// Re-reads the few-shot file and swaps the active set. Returns the number of examples loaded.
    pub fn reload_few_shot(&self) -> MiraResult<usize> {
        let path = self
            .few_shot_path
            .as_deref()
            .ok_or_else(|| MiraError::Config("few_shot_path is not configured".to_string()))?;
        let n = self.reflection.few_shot().reload(path, self.few_shot_limit);
        tracing::info!(target: "mira::pipeline", examples = n, "few-shot examples reloaded");
        Ok(n)
    }

    /// Processes one message for an authenticated caller.
    pub async fn process(
        &self,
        identity: &Identity,
        raw: Option<&str>,
        channel: Channel,
    ) -> Result<PipelineOutcome, PipelineError> {
        let mut stages = vec![Stage::Received];

        let text = match normalize(raw) {
            Ok(t) => t,
            Err(e) => {
                stages.push(Stage::Failed);
                tracing::info!(target: "mira::pipeline", user_id = %identity.id, ?channel, ?stages, "rejected empty message");
                return Err(PipelineError::new(e));
            }
        };
        stages.push(Stage::Normalized);

        let matches = self.lexicon.scan(&text);
        let heuristic = self.scorer.assess(&text);
        let local = CrisisEvidence::local(matches);
        stages.push(Stage::Assessed);

        let user_message = Message::new(&identity.id, Sender::User, channel, text.as_str());

        let agent = match channel {
            Channel::Chat => self.safety_agent.as_ref(),
            Channel::Journal => None,
        };

        let (decision, reflection) = match agent {
            Some(agent) => match self.consult_agent(agent.as_ref(), &identity.id, &text).await {
                Ok(verdict) => {
                    let decision = decide(&local.with_remote(&verdict));
                    let reflection = from_agent_reply(&verdict.response, &heuristic, decision.crisis_detected);
                    (decision, reflection)
                }
                Err(e) => {
                    let decision = decide(&local);
                    let event = crisis_event(&user_message, &decision);
                    let persistence = self.ledger.record_turn(&user_message, None, event.as_ref()).await;
                    stages.push(Stage::Failed);
                    tracing::error!(
                        target: "mira::pipeline",
                        user_id = %identity.id,
                        ?stages,
                        crisis = decision.crisis_detected,
                        persisted = persistence.complete(),
                        error = %e,
                        "safety agent failed"
                    );
                    return Err(PipelineError::with_escalation(e, decision));
                }
            },
            None => {
                let decision = decide(&local);
                let reflection = self
                    .reflection
                    .reflect(&text, channel, &heuristic, decision.crisis_detected)
                    .await;
                (decision, reflection)
            }
        };

        stages.push(if decision.crisis_detected {
            Stage::CrisisPath
        } else {
            Stage::ReflectionPath
        });

        let Reflection { result, assessment } = reflection;
        let reply = Message::new(&identity.id, Sender::Assistant, channel, result.summary_text.as_str())
            .with_emotion(result.emotion_label.as_str());
        let event = crisis_event(&user_message, &decision);
        let persistence = self.ledger.record_turn(&user_message, Some(&reply), event.as_ref()).await;
        stages.push(Stage::Persisted);

        let payload = ResponsePayload {
            message: match channel {
                Channel::Chat => "MIRA chat success".to_string(),
                Channel::Journal => "Journal added successfully".to_string(),
            },
            message_id: user_message.id.clone(),
            response: result.summary_text.clone(),
            emotion_detected: result.emotion_label.clone(),
            generated_by: result.generated_by,
            crisis_detected: decision.crisis_detected,
            severity: decision.severity,
            severity_score: decision.severity_score,
            action_taken: decision.action,
            contact_notified: decision.contact_notified,
        };
        stages.push(Stage::Responded);

        tracing::info!(
            target: "mira::pipeline",
            user_id = %identity.id,
            ?channel,
            ?stages,
            len = text.len(),
            crisis = decision.crisis_detected,
            severity = %decision.severity,
            generated_by = ?result.generated_by,
            persisted = persistence.complete(),
            "message processed"
        );

        Ok(PipelineOutcome {
            payload,
            assessment,
            reflection: result,
            decision,
            crisis_event: event,
            stages,
            persistence,
        })
    }

    async fn consult_agent(&self, agent: &dyn SafetyAgent, user_id: &str, text: &str) -> MiraResult<SafetyVerdict> {
        let request = SafetyRequest {
            user_id: user_id.to_string(),
            text: text.to_string(),
        };
        match tokio::time::timeout(self.agent_timeout, agent.evaluate(&request, self.agent_timeout)).await {
            Ok(result) => result,
            Err(_) => Err(MiraError::unavailable(
                UpstreamStage::SafetyAgent,
                format!("timed out after {} ms", self.agent_timeout.as_millis()),
            )),
        }
    }
}

/// Event for `user_message` when the decision is a crisis.
fn crisis_event(user_message: &Message, decision: &EscalationDecision) -> Option<CrisisEvent> {
    if !decision.crisis_detected {
        return None;
    }
    Some(CrisisEvent {
        id: Uuid::new_v4().to_string(),
        user_id: user_message.user_id.clone(),
        message_id: user_message.id.clone(),
        matched_keywords: decision.matched_keywords.clone(),
        severity: decision.severity,
        severity_score: decision.severity_score,
        action_taken: decision.action,
        action_requested: decision.action_requested,
        excerpt: excerpt(&user_message.text),
        detected_at: Utc::now(),
    })
}

/// First [`EXCERPT_CHARS`] characters, with `...` appended when cut.
pub fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}
