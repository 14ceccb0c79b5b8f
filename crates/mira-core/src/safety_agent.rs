//! Safety-agent client: forwards a chat turn to the remote crisis agent and normalizes its
//! answer. A body that is not the expected JSON is surfaced as `UpstreamMalformed`, since a
//! broken safety classifier is itself a safety incident.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};

use crate::decode::decode_json;
use crate::error::{MiraError, MiraResult, UpstreamStage};
use crate::types::Severity;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyRequest {
    pub user_id: String,
    /// The agent's wire name for the user text.
    #[serde(rename = "message")]
    pub text: String,
}

/// Normalized agent verdict.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SafetyVerdict {
    pub response: String,
    pub crisis_detected: bool,
    #[serde(default, deserialize_with = "severity_label")]
    pub severity: Severity,
    #[serde(default)]
    pub severity_score: Option<f64>,
    #[serde(default)]
    pub contact_notified: bool,
    #[serde(default)]
    pub call_initiated: bool,
}

fn severity_label<'de, D: Deserializer<'de>>(d: D) -> Result<Severity, D::Error> {
    let label: Option<String> = Option::deserialize(d)?;
    Ok(label.as_deref().map(Severity::from_label).unwrap_or_default())
}

#[async_trait]
pub trait SafetyAgent: Send + Sync {
    async fn evaluate(&self, request: &SafetyRequest, timeout: Duration) -> MiraResult<SafetyVerdict>;
}

/// HTTP client for the agent endpoint (`POST {url}` with `{user_id, message}`).
pub struct HttpSafetyAgent {
    client: reqwest::Client,
    url: String,
}

impl HttpSafetyAgent {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl SafetyAgent for HttpSafetyAgent {
    async fn evaluate(&self, request: &SafetyRequest, timeout: Duration) -> MiraResult<SafetyVerdict> {
        let res = self
            .client
            .post(&self.url)
            .timeout(timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| MiraError::unavailable(UpstreamStage::SafetyAgent, e.to_string()))?;

        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| MiraError::unavailable(UpstreamStage::SafetyAgent, e.to_string()))?;

        if !status.is_success() {
            tracing::error!(target: "mira::safety_agent", status = status.as_u16(), "safety agent error");
            return Err(MiraError::unavailable(UpstreamStage::SafetyAgent, body));
        }

        parse_verdict(&body)
    }
}

/// Strict decode of an agent body.
pub fn parse_verdict(body: &str) -> MiraResult<SafetyVerdict> {
    decode_json::<SafetyVerdict>(body).into_result(UpstreamStage::SafetyAgent)
}
