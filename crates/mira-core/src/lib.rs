//! mira-core: message-safety and reflection pipeline.
//!
//! Every user message (chat turn or journal entry) is scanned for crisis phrases, scored for
//! sentiment, escalated when warranted, reflected upon, and recorded in the ledger. The
//! gateway add-on is a thin HTTP layer over [`Pipeline`].

mod config;
mod crisis;
mod decode;
mod error;
mod escalation;
mod few_shot;
mod generator;
mod identity;
mod intake;
mod ledger;
mod pipeline;
mod reflection;
mod safety_agent;
mod sentiment;
mod types;

// Configuration
pub use config::{IdentitySettings, MiraConfig, ReflectionSettings, SafetyAgentSettings, StorageBackend};

// Errors
pub use error::{MiraError, MiraResult, PipelineError, UpstreamStage};

// Records
pub use types::{
    Channel, CrisisEvent, EmotionAssessment, EmotionCategory, EmotionSource, EscalationAction, GeneratedBy,
    Identity, LedgerRecord, Message, RecordKind, ReflectionResult, ResponsePayload, Sender, Severity,
};

// Local assessment
pub use crisis::{CrisisLexicon, DEFAULT_CRISIS_PHRASES};
pub use intake::normalize;
pub use sentiment::{categorize, SentimentLexicon, SentimentScorer, NEGATIVE_THRESHOLD, POSITIVE_THRESHOLD};

// Escalation
pub use escalation::{action_for, decide, CrisisEvidence, EscalationDecision, LOCAL_MATCH_SCORE, LOCAL_MATCH_SEVERITY};

// Reflection
pub use decode::{decode_json, strip_code_fence, Decoded};
pub use few_shot::{load_examples, parse_examples, FewShotExample, FewShotLibrary, FewShotSet, MAX_FEW_SHOT};
pub use generator::{ChatCompletionModel, LlmMode, MockModel, Prompt, ReflectionModel};
pub use reflection::{build_prompt, Reflection, ReflectionGenerator, SAFETY_MESSAGE};

// Collaborators
pub use identity::{from_settings as identity_from_settings, IdentityVerifier, StaticIdentity, SupabaseIdentity};
pub use ledger::{ConversationLedger, LedgerStore, MemoryLedgerStore, PersistenceReport, SledLedgerStore};
pub use safety_agent::{parse_verdict, HttpSafetyAgent, SafetyAgent, SafetyRequest, SafetyVerdict};

// Orchestration
pub use pipeline::{excerpt, Collaborators, Pipeline, PipelineOutcome, Stage, EXCERPT_CHARS};
