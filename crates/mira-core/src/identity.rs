//! Identity collaborator: resolves a bearer token to the caller's identity.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::IdentitySettings;
use crate::error::{MiraError, MiraResult, UpstreamStage};
use crate::types::Identity;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Verifies `token`. Rejections are `MiraError::Auth`.
    async fn verify(&self, token: &str) -> MiraResult<Identity>;
}

/// Builds the verifier the settings describe: Supabase when a URL is set, static tokens otherwise.
pub fn from_settings(settings: &IdentitySettings) -> MiraResult<std::sync::Arc<dyn IdentityVerifier>> {
    match settings.supabase_url.as_deref().filter(|u| !u.trim().is_empty()) {
        Some(url) => {
            let key = settings
                .supabase_key
                .clone()
                .ok_or_else(|| MiraError::Config("identity.supabase_key is required with supabase_url".to_string()))?;
            Ok(std::sync::Arc::new(SupabaseIdentity::new(url, key, settings.timeout())))
        }
        None => {
            if settings.static_tokens.is_empty() {
                tracing::warn!(target: "mira::identity", "no identity provider configured; every request will be rejected");
            }
            Ok(std::sync::Arc::new(StaticIdentity::new(settings.static_tokens.clone())))
        }
    }
}

#[derive(Deserialize)]
struct SupabaseUser {
    id: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    user_metadata: HashMap<String, serde_json::Value>,
}

/// Validates tokens against Supabase Auth (`GET {url}/auth/v1/user`).
pub struct SupabaseIdentity {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout: Duration,
}

impl SupabaseIdentity {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        }
    }
}

#[async_trait]
impl IdentityVerifier for SupabaseIdentity {
    async fn verify(&self, token: &str) -> MiraResult<Identity> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let res = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("apikey", &self.api_key)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| MiraError::unavailable(UpstreamStage::Identity, e.to_string()))?;

        let status = res.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(MiraError::Auth("Invalid or expired token".to_string()));
        }
        let body = res
            .text()
            .await
            .map_err(|e| MiraError::unavailable(UpstreamStage::Identity, e.to_string()))?;
        if !status.is_success() {
            return Err(MiraError::unavailable(UpstreamStage::Identity, body));
        }

        let user: SupabaseUser =
            serde_json::from_str(&body).map_err(|_| MiraError::malformed(UpstreamStage::Identity, body.clone()))?;
        let name = ["name", "full_name"]
            .iter()
            .find_map(|k| user.user_metadata.get(*k).and_then(|v| v.as_str()))
            .map(str::to_string);
        Ok(Identity {
            id: user.id,
            email: user.email,
            name,
        })
    }
}

/// Fixed token → user id map for development and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    tokens: HashMap<String, String>,
}

impl StaticIdentity {
    pub fn new(tokens: HashMap<String, String>) -> Self {
        Self { tokens }
    }

    pub fn with_token(mut self, token: impl Into<String>, user_id: impl Into<String>) -> Self {
        self.tokens.insert(token.into(), user_id.into());
        self
    }
}

#[async_trait]
impl IdentityVerifier for StaticIdentity {
    async fn verify(&self, token: &str) -> MiraResult<Identity> {
        self.tokens
            .get(token)
            .map(|id| Identity {
                id: id.clone(),
                email: None,
                name: None,
            })
            .ok_or_else(|| MiraError::Auth("Invalid or expired token".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_identity_accepts_known_tokens_only() {
        let v = StaticIdentity::default().with_token("t-1", "user-1");
        assert_eq!(v.verify("t-1").await.unwrap().id, "user-1");
        assert!(matches!(v.verify("nope").await, Err(MiraError::Auth(_))));
    }

    #[tokio::test]
    async fn stalled_identity_service_times_out() {
        // Accepts the connection and never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });

        let settings = IdentitySettings {
            supabase_url: Some(format!("http://{}", addr)),
            supabase_key: Some("anon".into()),
            timeout_ms: 100,
            ..IdentitySettings::default()
        };
        let verifier = from_settings(&settings).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), verifier.verify("t-1"))
            .await
            .expect("verify should give up on its own");
        assert!(matches!(
            result,
            Err(MiraError::UpstreamUnavailable {
                stage: UpstreamStage::Identity,
                ..
            })
        ));
    }

    #[test]
    fn supabase_requires_key() {
        let settings = IdentitySettings {
            supabase_url: Some("https://example.supabase.co".into()),
            ..IdentitySettings::default()
        };
        assert!(matches!(from_settings(&settings), Err(MiraError::Config(_))));
    }
}
