//! Schema-validating decode for JSON returned by external services.
//!
//! Callers get `Parsed(value)` or `Malformed(raw)` and decide per stage what a malformed
//! body means: the reflection stage degrades, the safety-agent stage surfaces it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

use crate::error::{MiraError, UpstreamStage};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```[A-Za-z0-9_-]*\s*\n?(.*?)\s*```$").expect("code fence pattern")
});

/// Outcome of decoding an external payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    Parsed(T),
    Malformed(String),
}

impl<T> Decoded<T> {
    pub fn is_parsed(&self) -> bool {
        matches!(self, Decoded::Parsed(_))
    }

    /// Surfaces a malformed body as `UpstreamMalformed` for `stage`.
    pub fn into_result(self, stage: UpstreamStage) -> Result<T, MiraError> {
        match self {
            Decoded::Parsed(v) => Ok(v),
            Decoded::Malformed(raw) => Err(MiraError::malformed(stage, raw)),
        }
    }
}

/// Strict decode of `raw` into `T`. Any syntax or shape mismatch keeps the raw text.
pub fn decode_json<T: DeserializeOwned>(raw: &str) -> Decoded<T> {
    match serde_json::from_str::<T>(raw.trim()) {
        Ok(v) => Decoded::Parsed(v),
        Err(_) => Decoded::Malformed(raw.to_string()),
    }
}

/// Removes one Markdown code fence wrapping the whole text, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    CODE_FENCE
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed)
}
