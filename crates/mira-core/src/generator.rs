//! Generative-text collaborator: sends a prompt to an LLM (mock or live API) and returns text.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ReflectionSettings;
use crate::error::{MiraError, MiraResult, UpstreamStage};

/// A prompt split into the system persona and the user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

/// Generates text for a prompt. Implementations must give up after `timeout`.
#[async_trait]
pub trait ReflectionModel: Send + Sync {
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> MiraResult<String>;
}

/// Mode for LLM invocation: mock (deterministic offline reply) or live (calls external API).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmMode {
    #[default]
    Mock,
    Live,
}

// OpenAI-compatible request/response structures
#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

/// Live model over an OpenAI-compatible `/chat/completions` endpoint (OpenRouter, OpenAI).
pub struct ChatCompletionModel {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ChatCompletionModel {
    pub fn new(settings: &ReflectionSettings) -> MiraResult<Self> {
        let api_key = settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| MiraError::Config("reflection.api_key is required in live mode".to_string()))?
            .to_string();
        Ok(Self {
            client: reqwest::Client::new(),
            api_url: settings.api_url.clone(),
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        })
    }
}

#[async_trait]
impl ReflectionModel for ChatCompletionModel {
    async fn generate(&self, prompt: &Prompt, timeout: Duration) -> MiraResult<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &prompt.system,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt.user,
                },
            ],
            temperature: Some(self.temperature),
            max_tokens: Some(self.max_tokens),
        };

        tracing::debug!(
            target: "mira::generator",
            model = %self.model,
            len = prompt.user.len(),
            "reflection request (prompt length only; content not logged)"
        );

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "MIRA-Reflection")
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| MiraError::unavailable(UpstreamStage::Reflection, e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| MiraError::unavailable(UpstreamStage::Reflection, e.to_string()))?;
        if !status.is_success() {
            return Err(MiraError::unavailable(
                UpstreamStage::Reflection,
                format!("HTTP {}: {}", status, text),
            ));
        }

        let parsed: ChatResponse = serde_json::from_str(&text)
            .map_err(|_| MiraError::malformed(UpstreamStage::Reflection, text.clone()))?;
        Ok(parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|s| s.trim().to_string())
            .unwrap_or_default())
    }
}

/// Deterministic offline model. Replies in the structured shape the reflection stage expects.
#[derive(Debug, Clone, Default)]
pub struct MockModel;

#[async_trait]
impl ReflectionModel for MockModel {
    async fn generate(&self, prompt: &Prompt, _timeout: Duration) -> MiraResult<String> {
        // Only the quoted user text, not the few-shot examples before it.
        let text = prompt.user.rsplit("\"\"\"").nth(1).unwrap_or(prompt.user.as_str());
        let lower = text.to_lowercase();
        let (emotion, summary) = if lower.contains("anxious") || lower.contains("worried") {
            (
                "anxious",
                "It sounds like a lot is pressing on you right now. Feeling unsettled like that is exhausting, and it makes sense you'd want some steadiness.",
            )
        } else if lower.contains("sad") || lower.contains("lonely") || lower.contains("tired") {
            (
                "sad",
                "It sounds like today has been heavy. Those feelings deserve room, and it's okay that things feel hard right now.",
            )
        } else {
            (
                "calm",
                "Thank you for sharing this. It sounds like you're taking a moment to notice how you're doing, and that matters.",
            )
        };
        Ok(serde_json::json!({ "emotion": emotion, "summary": summary }).to_string())
    }
}
