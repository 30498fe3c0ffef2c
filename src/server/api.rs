use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use nudge_common::{CallbackKind, TaskPayload, TenantStore};
use serde_json::json;
use subtle::ConstantTimeEq;

use super::slack;
use crate::config::NudgeConfig;
use crate::errors::LifecycleError;
use crate::reminder::MentionLifecycle;
use crate::slack::SlackClient;
use crate::slack::signature::{self, SIGNATURE_HEADER, SignatureError, TIMESTAMP_HEADER};
use crate::store::SecretStore;

/// Deadline for Slack events and scheduler callbacks.
pub const CALLBACK_DEADLINE: Duration = Duration::from_secs(30);
/// Deadline for slash commands and the OAuth redirect.
pub const INTERACTIVE_DEADLINE: Duration = Duration::from_secs(10);

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub lifecycle: Arc<MentionLifecycle>,
    pub tenants: Arc<dyn TenantStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub slack: SlackClient,
    pub config: NudgeConfig,
}

pub type SharedState = Arc<AppState>;

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Internal(String),
    Timeout,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                "request deadline exceeded".to_string(),
            ),
        };
        (status, Json(json!({"error": message}))).into_response()
    }
}

impl From<SignatureError> for ApiError {
    fn from(e: SignatureError) -> Self {
        ApiError::Unauthorized(e.to_string())
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/slack/events", post(slack::events))
        .route("/slack/commands", post(slack::commands))
        .route("/slack/oauth_redirect", get(slack::oauth_redirect))
        .route("/check/remind", post(check_remind))
        .route("/check/escalate", post(check_escalate))
        .route("/health", get(health_check))
}

// ── Helpers ───────────────────────────────────────────────────────────

/// Reject a Slack request whose signature does not match `body`.
pub(super) fn verify_slack_request(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), SignatureError> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    signature::verify(
        state.config.slack.signing_secret.as_deref(),
        header(TIMESTAMP_HEADER),
        header(SIGNATURE_HEADER),
        body,
        chrono::Utc::now().timestamp(),
    )
}

/// Check `Authorization: Bearer …` when a callback token is configured.
fn authorize_callback(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.server.callback_token.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Unauthorized("missing bearer token".into()))?;
    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized("invalid bearer token".into()))
    }
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn check_remind(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    run_check(&state, &headers, &body, CallbackKind::Remind).await
}

async fn check_escalate(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    run_check(&state, &headers, &body, CallbackKind::Escalate).await
}

/// Lifecycle failures answer 5xx so the scheduler redelivers.
async fn run_check(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
    callback: CallbackKind,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize_callback(state, headers)?;
    let payload: TaskPayload = serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid task payload: {}", e)))?;

    let check = async {
        match callback {
            CallbackKind::Remind => state.lifecycle.check_remind(&payload).await,
            CallbackKind::Escalate => state.lifecycle.check_escalate(&payload).await,
        }
    };
    let outcome = tokio::time::timeout(CALLBACK_DEADLINE, check)
        .await
        .map_err(|_| ApiError::Timeout)?
        .map_err(|e| {
            tracing::error!(key = %payload.key(), callback = %callback, kind = e.kind(), error = %e, "Check failed");
            match e {
                LifecycleError::Invalid { .. } => ApiError::BadRequest(e.to_string()),
                _ => ApiError::Internal(e.to_string()),
            }
        })?;

    Ok(Json(json!({"status": "ok", "outcome": outcome.as_str()})))
}
