//! Reflection stage: builds a grounded prompt, calls the generative model under a timeout,
//! and parses its answer defensively. Always yields a non-empty summary.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::decode::{decode_json, strip_code_fence, Decoded};
use crate::few_shot::{FewShotExample, FewShotLibrary};
use crate::generator::{Prompt, ReflectionModel};
use crate::types::{
    Channel, EmotionAssessment, EmotionCategory, EmotionSource, GeneratedBy, ReflectionResult,
};

/// Shown instead of a generated reflection whenever the message is on the crisis path.
pub const SAFETY_MESSAGE: &str = "Crisis indicators detected. Please reach out to someone you trust or contact emergency support immediately. You don't have to go through this alone.";

const PERSONA: &str = "You are Mira, a warm, deeply empathetic mental health companion. \
You listen closely, reflect emotions, and respond like a trusted friend. \
You never diagnose, never give medical advice, and never dismiss pain. \
Avoid advice, poetic or religious phrases, and a robotic tone. Be gentle and understanding.";

const CHAT_TASK: &str = "Reply in 2-4 sentences and end with one gentle, open-ended question.";

const JOURNAL_TASK: &str = "Analyze the journal entry: determine the writer's emotional tone \
(happy, sad, anxious, calm, etc.) and write a short 2-3 sentence empathetic reflection.";

const JSON_CONTRACT: &str = "Return only JSON: {\"emotion\": \"<emotion>\", \"summary\": \"<reflective summary>\"}";

const SPEAKER_PREFIXES: &[&str] = &["mira:", "assistant:", "ai:"];

/// Shape the model is asked to return.
#[derive(Debug, Deserialize)]
struct ModelReflection {
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    summary: Option<String>,
}

/// Output of the reflection stage: the reflection plus the one emotion assessment for the message.
#[derive(Debug, Clone, PartialEq)]
pub struct Reflection {
    pub result: ReflectionResult,
    pub assessment: EmotionAssessment,
}

pub struct ReflectionGenerator {
    model: Arc<dyn ReflectionModel>,
    few_shot: Arc<FewShotLibrary>,
    timeout: Duration,
}

impl ReflectionGenerator {
    pub fn new(model: Arc<dyn ReflectionModel>, few_shot: Arc<FewShotLibrary>, timeout: Duration) -> Self {
        Self {
            model,
            few_shot,
            timeout,
        }
    }

    pub fn few_shot(&self) -> &Arc<FewShotLibrary> {
        &self.few_shot
    }

    /// Produces the reflection for `text`. `heuristic` is the local sentiment assessment; when
    /// `crisis` is set the model is not consulted and the safety message is returned.
    pub async fn reflect(
        &self,
        text: &str,
        channel: Channel,
        heuristic: &EmotionAssessment,
        crisis: bool,
    ) -> Reflection {
        if crisis {
            return crisis_reflection(heuristic);
        }

        let examples = self.few_shot.snapshot();
        let prompt = build_prompt(text, channel, &examples);

        let raw = match tokio::time::timeout(self.timeout, self.model.generate(&prompt, self.timeout)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                tracing::warn!(target: "mira::reflection", error = %e, "reflection model failed; using heuristic summary");
                return heuristic_reflection(heuristic);
            }
            Err(_) => {
                tracing::warn!(
                    target: "mira::reflection",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "reflection model timed out; using heuristic summary"
                );
                return heuristic_reflection(heuristic);
            }
        };

        interpret(&raw, heuristic)
    }
}

/// Prompt with persona, task, up to five grounding examples, and the user text.
pub fn build_prompt(text: &str, channel: Channel, examples: &[FewShotExample]) -> Prompt {
    let task = match channel {
        Channel::Chat => CHAT_TASK,
        Channel::Journal => JOURNAL_TASK,
    };
    let system = format!("{}\n\n{}\n{}", PERSONA, task, JSON_CONTRACT);

    let mut user = String::new();
    if !examples.is_empty() {
        user.push_str("Examples of the tone to use:\n");
        for ex in examples {
            user.push_str(&format!("User: {}\nMira: {}\n\n", ex.question, ex.answer));
        }
    }
    let label = match channel {
        Channel::Chat => "Message",
        Channel::Journal => "Journal",
    };
    user.push_str(&format!("{}:\n\"\"\"{}\"\"\"", label, text));
    Prompt { system, user }
}

/// Parses model output: structured `{emotion, summary}` if possible, raw text otherwise.
fn interpret(raw: &str, heuristic: &EmotionAssessment) -> Reflection {
    let body = strip_code_fence(raw);
    if body.is_empty() {
        return heuristic_reflection(heuristic);
    }

    match decode_json::<ModelReflection>(body) {
        Decoded::Parsed(parsed) => {
            let label = parsed
                .emotion
                .map(|e| e.trim().to_lowercase())
                .filter(|e| !e.is_empty());
            let summary = parsed
                .summary
                .map(|s| strip_speaker_prefix(&s).to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| body.to_string());
            let assessment = match label.as_deref() {
                Some(l) => EmotionAssessment {
                    source: EmotionSource::Generative,
                    category: EmotionCategory::from_label(l)
                        .filter(|c| *c != EmotionCategory::Crisis)
                        .unwrap_or(heuristic.category),
                    score: heuristic.score,
                },
                None => heuristic.clone(),
            };
            Reflection {
                result: ReflectionResult {
                    emotion_label: label.unwrap_or_else(|| heuristic.category.to_string()),
                    summary_text: summary,
                    generated_by: GeneratedBy::Generative,
                },
                assessment,
            }
        }
        Decoded::Malformed(_) => {
            tracing::debug!(target: "mira::reflection", "model output not structured; using raw text");
            let summary = strip_speaker_prefix(body);
            if summary.is_empty() {
                return heuristic_reflection(heuristic);
            }
            Reflection {
                result: ReflectionResult {
                    emotion_label: heuristic.category.to_string(),
                    summary_text: summary.to_string(),
                    generated_by: GeneratedBy::Generative,
                },
                assessment: heuristic.clone(),
            }
        }
    }
}

/// Reflection built from the safety agent's reply text.
pub fn from_agent_reply(reply: &str, heuristic: &EmotionAssessment, crisis: bool) -> Reflection {
    let text = strip_speaker_prefix(reply);
    if text.is_empty() {
        return if crisis {
            crisis_reflection(heuristic)
        } else {
            heuristic_reflection(heuristic)
        };
    }
    let assessment = if crisis {
        crisis_assessment(heuristic)
    } else {
        heuristic.clone()
    };
    Reflection {
        result: ReflectionResult {
            emotion_label: assessment.category.to_string(),
            summary_text: text.to_string(),
            generated_by: GeneratedBy::Generative,
        },
        assessment,
    }
}

pub fn crisis_reflection(heuristic: &EmotionAssessment) -> Reflection {
    Reflection {
        result: ReflectionResult {
            emotion_label: EmotionCategory::Crisis.to_string(),
            summary_text: SAFETY_MESSAGE.to_string(),
            generated_by: GeneratedBy::HeuristicFallback,
        },
        assessment: crisis_assessment(heuristic),
    }
}

/// Templated acknowledgment from local signals only.
pub fn heuristic_reflection(heuristic: &EmotionAssessment) -> Reflection {
    let summary = match heuristic.category {
        EmotionCategory::Positive => {
            "It sounds like there's something good in this for you. Thank you for sharing it. What made it feel that way?"
        }
        EmotionCategory::Negative => {
            "That sounds really heavy to carry. You don't have to go through this alone. What's been the hardest part lately?"
        }
        EmotionCategory::Crisis => SAFETY_MESSAGE,
        EmotionCategory::Neutral => {
            "Thank you for sharing this with me. I'm here and listening. How are you feeling about it right now?"
        }
    };
    Reflection {
        result: ReflectionResult {
            emotion_label: heuristic.category.to_string(),
            summary_text: summary.to_string(),
            generated_by: GeneratedBy::HeuristicFallback,
        },
        assessment: heuristic.clone(),
    }
}

fn crisis_assessment(heuristic: &EmotionAssessment) -> EmotionAssessment {
    EmotionAssessment {
        source: EmotionSource::Heuristic,
        category: EmotionCategory::Crisis,
        score: heuristic.score,
    }
}

/// Drops a leading `Mira:` / `Assistant:` / `AI:` speaker tag.
fn strip_speaker_prefix(text: &str) -> &str {
    let trimmed = text.trim();
    let lower = trimmed.to_lowercase();
    if SPEAKER_PREFIXES.iter().any(|p| lower.starts_with(p)) {
        if let Some((_, rest)) = trimmed.split_once(':') {
            return rest.trim();
        }
    }
    trimmed
}
