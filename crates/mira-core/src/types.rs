//! Records shared across the pipeline: messages, assessments, crisis events, and the
//! response contract returned to the gateway.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Authenticated caller, as returned by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
}

/// Where a message entered the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Chat,
    Journal,
}

/// One turn in the ledger. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub user_id: String,
    pub sender: Sender,
    pub channel: Channel,
    pub text: String,
    /// Emotion label attached to assistant reflections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(user_id: &str, sender: Sender, channel: Channel, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            sender,
            channel,
            text: text.into(),
            emotion: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_emotion(mut self, emotion: impl Into<String>) -> Self {
        self.emotion = Some(emotion.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionSource {
    Heuristic,
    Generative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionCategory {
    Positive,
    Neutral,
    Negative,
    Crisis,
}

impl EmotionCategory {
    /// Valence rank: negative < neutral < positive. Crisis sits below negative.
    pub fn rank(self) -> i8 {
        match self {
            EmotionCategory::Crisis => -2,
            EmotionCategory::Negative => -1,
            EmotionCategory::Neutral => 0,
            EmotionCategory::Positive => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EmotionCategory::Positive => "positive",
            EmotionCategory::Neutral => "neutral",
            EmotionCategory::Negative => "negative",
            EmotionCategory::Crisis => "crisis",
        }
    }

    /// Maps a free-form emotion label (as a model would return it) onto a category.
    pub fn from_label(label: &str) -> Option<Self> {
        let l = label.trim().to_lowercase();
        const POSITIVE: &[&str] = &[
            "positive", "happy", "joyful", "calm", "grateful", "hopeful", "content", "excited",
            "relieved", "proud", "peaceful",
        ];
        const NEGATIVE: &[&str] = &[
            "negative", "sad", "anxious", "angry", "stressed", "lonely", "frustrated", "afraid",
            "scared", "overwhelmed", "tired", "hurt", "worried", "depressed", "ashamed",
        ];
        if l == "crisis" {
            Some(EmotionCategory::Crisis)
        } else if l == "neutral" {
            Some(EmotionCategory::Neutral)
        } else if POSITIVE.contains(&l.as_str()) {
            Some(EmotionCategory::Positive)
        } else if NEGATIVE.contains(&l.as_str()) {
            Some(EmotionCategory::Negative)
        } else {
            None
        }
    }
}

impl fmt::Display for EmotionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exactly one per user message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionAssessment {
    pub source: EmotionSource,
    pub category: EmotionCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Ordered risk level: none < low < moderate < high < critical.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    /// Parses a severity label from an external classifier. The safety agent's
    /// three-level scale (`none | moderate | severe`) is accepted as well; unknown
    /// labels read as `None`.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "low" | "mild" => Severity::Low,
            "moderate" | "medium" => Severity::Moderate,
            "high" | "severe" => Severity::High,
            "critical" | "emergency" => Severity::Critical,
            _ => Severity::None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Moderate => "moderate",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Safety response requested for an escalation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EscalationAction {
    #[default]
    None,
    Sms,
    Call,
}

/// Append-only record of a detected crisis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisEvent {
    pub id: String,
    pub user_id: String,
    pub message_id: String,
    pub matched_keywords: Vec<String>,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_score: Option<f64>,
    pub action_taken: EscalationAction,
    /// False when the safety agent reported it had already notified a contact.
    pub action_requested: bool,
    pub excerpt: String,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeneratedBy {
    HeuristicFallback,
    Generative,
}

/// The reflection shown to the user. `summary_text` is never empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectionResult {
    pub emotion_label: String,
    pub summary_text: String,
    pub generated_by: GeneratedBy,
}

/// The single outward contract of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub message: String,
    pub message_id: String,
    pub response: String,
    pub emotion_detected: String,
    pub generated_by: GeneratedBy,
    pub crisis_detected: bool,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity_score: Option<f64>,
    pub action_taken: EscalationAction,
    pub contact_notified: bool,
}

/// Kind selector for ledger queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Message,
    CrisisEvent,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Message => "messages",
            RecordKind::CrisisEvent => "crisis_events",
        }
    }
}

/// Anything the ledger stores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerRecord {
    Message(Message),
    CrisisEvent(CrisisEvent),
}

impl LedgerRecord {
    pub fn kind(&self) -> RecordKind {
        match self {
            LedgerRecord::Message(_) => RecordKind::Message,
            LedgerRecord::CrisisEvent(_) => RecordKind::CrisisEvent,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            LedgerRecord::Message(m) => &m.id,
            LedgerRecord::CrisisEvent(e) => &e.id,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            LedgerRecord::Message(m) => &m.user_id,
            LedgerRecord::CrisisEvent(e) => &e.user_id,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        match self {
            LedgerRecord::Message(m) => m.created_at,
            LedgerRecord::CrisisEvent(e) => e.detected_at,
        }
    }
}
