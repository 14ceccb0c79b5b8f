//! HTTP surface. Handlers authenticate, hand the text to the pipeline and shape JSON.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{rejection::JsonRejection, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mira_core::{
    Channel, EscalationDecision, Identity, IdentityVerifier, MiraError, Pipeline, PipelineError,
    PipelineOutcome,
};
use serde::Deserialize;
use serde_json::json;

#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<Pipeline>,
    identity: Arc<dyn IdentityVerifier>,
    admin_token: Option<String>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>, identity: Arc<dyn IdentityVerifier>, admin_token: Option<String>) -> Self {
        Self {
            pipeline,
            identity,
            admin_token: admin_token.filter(|t| !t.trim().is_empty()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/me", get(me))
        .route("/api/chat", post(post_chat).get(chat_history))
        .route("/api/journal", post(post_journal).get(journal_history))
        .route("/api/crisis", get(crisis_history))
        .route("/api/admin/few-shot/reload", post(reload_few_shot))
        .with_state(state)
}

/// Error response: status from the error kind, diagnostics for upstream failures, and the
/// escalation decision when one was computed before the failure.
pub struct ApiError {
    error: MiraError,
    escalation: Option<EscalationDecision>,
    message: Option<&'static str>,
}

impl ApiError {
    fn with_message(mut self, message: &'static str) -> Self {
        self.message = Some(message);
        self
    }
}

impl From<MiraError> for ApiError {
    fn from(error: MiraError) -> Self {
        Self {
            error,
            escalation: None,
            message: None,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        Self {
            error: e.error,
            escalation: e.escalation,
            message: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let message = match (&self.error, self.message) {
            (MiraError::Validation(_), Some(m)) => m.to_string(),
            (MiraError::Validation(m), None) | (MiraError::Auth(m), _) => m.clone(),
            (MiraError::UpstreamUnavailable { .. } | MiraError::UpstreamMalformed { .. }, _) => {
                self.error.to_string()
            }
            _ => "Internal error".to_string(),
        };

        if status.is_server_error() {
            tracing::error!(target: "mira::gateway", status = status.as_u16(), error = %self.error, "request failed");
        }

        let mut body = json!({ "message": message });
        if let Some(raw) = self.error.upstream_payload() {
            body["error"] = json!(raw);
        }
        if let Some(d) = &self.escalation {
            body["crisis_detected"] = json!(d.crisis_detected);
            body["severity"] = json!(d.severity);
            body["action_taken"] = json!(d.action);
        }
        (status, Json(body)).into_response()
    }
}

/// Caller resolved from `Authorization: Bearer <token>`.
pub struct AuthUser(pub Identity);

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers).ok_or_else(|| MiraError::Auth("No token provided".to_string()))?;
        let identity = state.identity.verify(token).await.map_err(|e| match e {
            MiraError::Auth(_) => e,
            other => {
                tracing::warn!(target: "mira::gateway", error = %other, "identity check failed");
                MiraError::Auth("Invalid or expired token".to_string())
            }
        })?;
        Ok(AuthUser(identity))
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "time": chrono::Utc::now().to_rfc3339() }))
}

async fn me(AuthUser(user): AuthUser) -> Json<serde_json::Value> {
    Json(json!({ "message": "Authenticated", "user": user }))
}

#[derive(Debug, Default, Deserialize)]
struct ChatBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JournalBody {
    #[serde(default)]
    content: Option<String>,
}

/// An unreadable body (wrong content type, bad JSON) counts as an empty one, so the pipeline
/// answers with its usual validation error instead of a plain-text rejection.
fn body_or_default<T: Default>(body: Result<Json<T>, JsonRejection>) -> T {
    match body {
        Ok(Json(b)) => b,
        Err(rejection) => {
            tracing::debug!(target: "mira::gateway", status = rejection.status().as_u16(), "unreadable request body");
            T::default()
        }
    }
}

/// Runs the pipeline on its own task so a dropped connection does not cancel ledger writes.
async fn run(
    state: &AppState,
    user: Identity,
    text: Option<String>,
    channel: Channel,
) -> Result<PipelineOutcome, ApiError> {
    let pipeline = Arc::clone(&state.pipeline);
    let task = tokio::spawn(async move { pipeline.process(&user, text.as_deref(), channel).await });
    let outcome = task
        .await
        .map_err(|e| ApiError::from(MiraError::Internal(format!("pipeline task: {}", e))))??;
    Ok(outcome)
}

async fn post_chat(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<ChatBody>, JsonRejection>,
) -> Result<Json<mira_core::ResponsePayload>, ApiError> {
    let body: ChatBody = body_or_default(body);
    let outcome = run(&state, user, body.message, Channel::Chat).await?;
    Ok(Json(outcome.payload))
}

async fn post_journal(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    body: Result<Json<JournalBody>, JsonRejection>,
) -> Result<(StatusCode, Json<mira_core::ResponsePayload>), ApiError> {
    let body: JournalBody = body_or_default(body);
    let outcome = run(&state, user, body.content, Channel::Journal)
        .await
        .map_err(|e| e.with_message("Journal content is required"))?;
    Ok((StatusCode::CREATED, Json(outcome.payload)))
}

async fn chat_history(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<Response, ApiError> {
    let messages = state.pipeline.ledger().messages(&user.id, Channel::Chat).await?;
    Ok(Json(messages).into_response())
}

async fn journal_history(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<Response, ApiError> {
    let entries = state.pipeline.ledger().journal_history(&user.id).await?;
    Ok(Json(entries).into_response())
}

async fn crisis_history(State(state): State<AppState>, AuthUser(user): AuthUser) -> Result<Response, ApiError> {
    let events = state.pipeline.ledger().crisis_events(&user.id).await?;
    Ok(Json(events).into_response())
}

async fn reload_few_shot(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<serde_json::Value>, ApiError> {
    let expected = state
        .admin_token
        .as_deref()
        .ok_or_else(|| MiraError::Auth("Admin routes are disabled".to_string()))?;
    if bearer(&headers) != Some(expected) {
        return Err(MiraError::Auth("Invalid admin token".to_string()).into());
    }
    let examples = state.pipeline.reload_few_shot()?;
    Ok(Json(json!({ "message": "Few-shot examples reloaded", "examples": examples })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use mira_core::{
        parse_verdict, Collaborators, MemoryLedgerStore, MiraConfig, MiraResult, MockModel, SafetyAgent,
        SafetyRequest, SafetyVerdict, StaticIdentity,
    };
    use std::time::Duration;
    use tower::ServiceExt;

    struct GarbledAgent;

    #[async_trait]
    impl SafetyAgent for GarbledAgent {
        async fn evaluate(&self, _request: &SafetyRequest, _timeout: Duration) -> MiraResult<SafetyVerdict> {
            parse_verdict("Traceback (most recent call last)")
        }
    }

    fn app_with(agent: Option<Arc<dyn SafetyAgent>>, admin_token: Option<&str>) -> Router {
        let pipeline = Pipeline::new(
            &MiraConfig::default(),
            Collaborators {
                model: Arc::new(MockModel),
                safety_agent: agent,
                store: Arc::new(MemoryLedgerStore::new()),
            },
        )
        .unwrap();
        let identity = StaticIdentity::default().with_token("t-1", "user-1");
        router(AppState::new(
            Arc::new(pipeline),
            Arc::new(identity),
            admin_token.map(str::to_string),
        ))
    }

    fn app() -> Router {
        app_with(None, None)
    }

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("authorization", format!("Bearer {}", t));
        }
        match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let res = app.oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let (status, json) = send(app(), request("GET", "/api/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
    }

    #[tokio::test]
    async fn missing_or_bad_token_is_401() {
        let body = Some(json!({ "message": "hello" }));
        let (status, json) = send(app(), request("POST", "/api/chat", None, body.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["message"], "No token provided");

        let (status, json) = send(app(), request("POST", "/api/chat", Some("wrong"), body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json["message"], "Invalid or expired token");
    }

    #[tokio::test]
    async fn me_returns_identity() {
        let (status, json) = send(app(), request("GET", "/api/me", Some("t-1"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["message"], "Authenticated");
        assert_eq!(json["user"]["id"], "user-1");
    }

    #[tokio::test]
    async fn empty_chat_is_400() {
        let (status, json) = send(app(), request("POST", "/api/chat", Some("t-1"), Some(json!({ "message": "  " })))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Message required");

        let (status, json) = send(app(), request("POST", "/api/journal", Some("t-1"), Some(json!({})))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Journal content is required");
    }

    #[tokio::test]
    async fn unreadable_body_is_a_json_validation_error() {
        let (status, json) = send(app(), request("POST", "/api/chat", Some("t-1"), None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Message required");

        let req = Request::builder()
            .method("POST")
            .uri("/api/journal")
            .header("authorization", "Bearer t-1")
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, json) = send(app(), req).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["message"], "Journal content is required");
    }

    #[tokio::test]
    async fn crisis_chat_reports_escalation() {
        let app = app();
        let (status, json) = send(
            app.clone(),
            request("POST", "/api/chat", Some("t-1"), Some(json!({ "message": "I want to end my life" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["crisis_detected"], true);
        assert_eq!(json["severity"], "high");
        assert_eq!(json["action_taken"], "call");
        assert!(!json["response"].as_str().unwrap().is_empty());

        let (status, json) = send(app, request("GET", "/api/crisis", Some("t-1"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json.as_array().unwrap().len(), 1);
        assert_eq!(json[0]["matched_keywords"][0], "end my life");
    }

    #[tokio::test]
    async fn journal_is_created_and_listed() {
        let app = app();
        let (status, json) = send(
            app.clone(),
            request("POST", "/api/journal", Some("t-1"), Some(json!({ "content": "I feel anxious about tomorrow" }))),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["message"], "Journal added successfully");
        assert_eq!(json["emotion_detected"], "anxious");
        assert_eq!(json["generated_by"], "generative");

        let (_, json) = send(app, request("GET", "/api/journal", Some("t-1"), None)).await;
        let entries = json.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries.iter().filter(|e| e["sender"] == "user").count(), 1);
    }

    #[tokio::test]
    async fn malformed_agent_is_502_with_raw_body() {
        let app = app_with(Some(Arc::new(GarbledAgent) as Arc<dyn SafetyAgent>), None);
        let (status, json) = send(
            app,
            request("POST", "/api/chat", Some("t-1"), Some(json!({ "message": "I feel hopeless" }))),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(json["error"], "Traceback (most recent call last)");
        assert_eq!(json["crisis_detected"], true);
        assert_eq!(json["severity"], "high");
    }

    #[tokio::test]
    async fn admin_reload_requires_token() {
        let (status, _) = send(app(), request("POST", "/api/admin/few-shot/reload", Some("t-1"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let app = app_with(None, Some("admin-secret"));
        let (status, _) = send(app.clone(), request("POST", "/api/admin/few-shot/reload", Some("t-1"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        // Authorized, but no few-shot file configured.
        let (status, _) = send(app, request("POST", "/api/admin/few-shot/reload", Some("admin-secret"), None)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
