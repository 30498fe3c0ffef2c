//! Slack-facing handlers: Events API, slash commands and the OAuth install redirect.

use std::collections::HashMap;

use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
};
use nudge_common::MentionEvent;

use super::api::{
    ApiError, AppState, CALLBACK_DEADLINE, INTERACTIVE_DEADLINE, SharedState, verify_slack_request,
};
use crate::errors::SlackError;
use crate::slack::dto::{
    EventCallback, EventEnvelope, InnerEvent, MessageEvent, SlashCommand, SlashCommandForm,
    SlashResponse, UserRef,
};

// ── Events API ────────────────────────────────────────────────────────

/// `POST /slack/events`. Lifecycle errors are logged and still acknowledged.
pub async fn events(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let envelope: Option<EventEnvelope> = serde_json::from_slice(&body).ok();
    if let Some(EventEnvelope::UrlVerification { challenge }) = &envelope {
        return Ok(challenge.clone().into_response());
    }

    verify_slack_request(&state, &headers, &body)?;
    let envelope =
        envelope.ok_or_else(|| ApiError::BadRequest("invalid event payload".to_string()))?;

    let EventEnvelope::EventCallback(callback) = envelope else {
        return Ok(StatusCode::OK.into_response());
    };
    let Some(message) = watched_message(&state, &callback) else {
        return Ok(StatusCode::OK.into_response());
    };

    let event = MentionEvent {
        team_id: callback.team_id.clone(),
        channel_id: message.channel.clone(),
        message_ts: message.ts.clone(),
        text: message.text.clone(),
        bot_user_id: callback.bot_user_id().unwrap_or_default().to_string(),
        parent_user_id: message.user.clone(),
        now: chrono::Utc::now().timestamp(),
    };

    match tokio::time::timeout(CALLBACK_DEADLINE, state.lifecycle.on_mention(&event)).await {
        Ok(Ok(watched)) => {
            tracing::debug!(team = %event.team_id, event_id = ?callback.event_id, watched, "Event handled");
        }
        Ok(Err(e)) => {
            tracing::error!(
                team = %event.team_id,
                event_id = ?callback.event_id,
                kind = e.kind(),
                error = %e,
                "Failed to handle mention event"
            );
        }
        Err(_) => {
            tracing::error!(team = %event.team_id, event_id = ?callback.event_id, "Mention event timed out");
        }
    }
    Ok(StatusCode::OK.into_response())
}

/// The message to watch, if this event is a human mention we handle.
fn watched_message<'a>(state: &AppState, callback: &'a EventCallback) -> Option<&'a MessageEvent> {
    let message = match &callback.event {
        InnerEvent::AppMention(m) => m,
        InnerEvent::Message(m) if state.config.slack.watch_channel_messages => m,
        _ => return None,
    };
    if message.is_from_bot() {
        tracing::debug!(team = %callback.team_id, ts = %message.ts, "Ignoring bot message");
        return None;
    }
    Some(message)
}

// ── Slash commands ────────────────────────────────────────────────────

type CommandReply = (StatusCode, Json<SlashResponse>);

fn reply(status: StatusCode, text: impl Into<String>) -> CommandReply {
    (status, Json(SlashResponse::ephemeral(text)))
}

/// `POST /slack/commands` (form encoded).
pub async fn commands(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<CommandReply, ApiError> {
    verify_slack_request(&state, &headers, &body)?;
    let form = parse_command_form(&body);

    let command = match SlashCommand::parse(&form.command, &form.text) {
        Ok(command) => command,
        Err(msg) => return Ok(reply(StatusCode::BAD_REQUEST, msg)),
    };
    tracing::info!(team = %form.team_id, user = %form.user_id, command = %form.command, "Slash command");

    let handled = tokio::time::timeout(INTERACTIVE_DEADLINE, async {
        match command {
            SlashCommand::SetManager(text) => set_manager(&state, &form.team_id, &text).await,
            SlashCommand::UnsetManager => unset_manager(&state, &form.team_id).await,
            SlashCommand::GetManager => get_manager(&state, &form.team_id).await,
        }
    })
    .await;
    Ok(handled.unwrap_or_else(|_| {
        reply(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Timed out, please try again.",
        )
    }))
}

fn parse_command_form(body: &[u8]) -> SlashCommandForm {
    let mut form = SlashCommandForm::default();
    for (name, value) in url::form_urlencoded::parse(body) {
        let slot = match &*name {
            "team_id" => &mut form.team_id,
            "channel_id" => &mut form.channel_id,
            "user_id" => &mut form.user_id,
            "command" => &mut form.command,
            "text" => &mut form.text,
            _ => continue,
        };
        *slot = value.into_owned();
    }
    form
}

async fn set_manager(state: &AppState, team_id: &str, text: &str) -> CommandReply {
    let Some(user_ref) = UserRef::parse(text) else {
        return reply(StatusCode::BAD_REQUEST, "Usage: /_set_manager @user");
    };
    let user_id = match user_ref {
        UserRef::Id(id) => id,
        UserRef::Name(name) => match state.slack.find_user_id(team_id, &name).await {
            Ok(id) => id,
            Err(SlackError::UserNotFound(name)) => {
                return reply(StatusCode::OK, format!("No user named '{}' was found.", name));
            }
            Err(e) => {
                tracing::error!(team = %team_id, error = %e, "User lookup failed");
                return reply(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("User lookup failed: {}", e),
                );
            }
        },
    };

    match state.tenants.set_manager(team_id, Some(&user_id)).await {
        Ok(()) => {
            tracing::info!(team = %team_id, manager = %user_id, "Manager set");
            reply(StatusCode::OK, format!("Manager set to <@{}>.", user_id))
        }
        Err(e) if e.is_not_found() => not_installed(),
        Err(e) => {
            tracing::error!(team = %team_id, error = %e, "Failed to set manager");
            reply(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to set manager: {}", e),
            )
        }
    }
}

async fn unset_manager(state: &AppState, team_id: &str) -> CommandReply {
    match state.tenants.set_manager(team_id, None).await {
        Ok(()) => {
            tracing::info!(team = %team_id, "Manager cleared");
            reply(StatusCode::OK, "Manager removed.")
        }
        Err(e) if e.is_not_found() => not_installed(),
        Err(e) => {
            tracing::error!(team = %team_id, error = %e, "Failed to clear manager");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to remove manager.")
        }
    }
}

async fn get_manager(state: &AppState, team_id: &str) -> CommandReply {
    match state.tenants.get(team_id).await {
        Ok(tenant) => match tenant.manager_user_id {
            Some(manager) => reply(StatusCode::OK, format!("Current manager: <@{}>", manager)),
            None => reply(StatusCode::OK, "No manager is set."),
        },
        Err(e) if e.is_not_found() => not_installed(),
        Err(e) => {
            tracing::error!(team = %team_id, error = %e, "Failed to read tenant");
            reply(StatusCode::INTERNAL_SERVER_ERROR, "Failed to read workspace settings.")
        }
    }
}

fn not_installed() -> CommandReply {
    reply(StatusCode::OK, "This workspace is not installed.")
}

// ── OAuth install ─────────────────────────────────────────────────────

const INSTALLED_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>nudge installed</title>
    <style>
        body { font-family: sans-serif; margin: 40px; }
        .success { color: green; font-size: 18px; font-weight: bold; }
    </style>
</head>
<body>
    <div class="success">nudge is installed.</div>
    <p>Mention people in a channel with the bot to start watching for replies.</p>
    <p>Set the escalation contact with <code>/_set_manager @user</code>.</p>
</body>
</html>
"#;

/// `GET /slack/oauth_redirect?code=…`
pub async fn oauth_redirect(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Html<&'static str>, ApiError> {
    if let Some(error) = params.get("error") {
        return Err(ApiError::BadRequest(format!("Install was cancelled: {}", error)));
    }
    let code = params
        .get("code")
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing code parameter".to_string()))?;

    tokio::time::timeout(INTERACTIVE_DEADLINE, install(&state, code))
        .await
        .map_err(|_| ApiError::Timeout)??;
    Ok(Html(INSTALLED_PAGE))
}

async fn install(state: &AppState, code: &str) -> Result<(), ApiError> {
    let slack = &state.config.slack;
    let (Some(client_id), Some(client_secret)) = (&slack.client_id, &slack.client_secret) else {
        return Err(ApiError::Internal(
            "Slack OAuth client is not configured".to_string(),
        ));
    };

    let access = state
        .slack
        .oauth_access(
            client_id,
            client_secret,
            code,
            slack.oauth_redirect_url.as_deref(),
        )
        .await
        .map_err(|e| ApiError::BadRequest(format!("Token exchange failed: {}", e)))?;

    let team_id = access.team.id;
    let secret_name = slack.token_secret_name(&team_id);
    state
        .secrets
        .put_secret(&secret_name, &access.access_token)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to store token: {:#}", e)))?;
    state
        .tenants
        .upsert_credential_ref(&team_id, &secret_name)
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to register team: {}", e)))?;
    state.slack.credentials().invalidate(&team_id);

    tracing::info!(
        team = %team_id,
        team_name = access.team.name.as_deref().unwrap_or(""),
        bot_user = access.bot_user_id.as_deref().unwrap_or(""),
        "Workspace installed"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::tests_support::{TestApp, signed_request};
    use super::*;
    use crate::store::SecretStore;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use nudge_common::CallbackKind;
    use tower::ServiceExt;

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn mention_event(event_type: &str, extra: &str) -> String {
        format!(
            r#"{{
                "type": "event_callback",
                "team_id": "T1",
                "event_id": "Ev1",
                "authorizations": [{{"user_id": "UBOT", "is_bot": true}}],
                "event": {{
                    "type": "{}",
                    "user": "U1",
                    "text": "<@UBOT> <@U2> can you check this?",
                    "ts": "100.0",
                    "channel": "C1"{}
                }}
            }}"#,
            event_type, extra
        )
    }

    fn command(body: &str) -> Request<Body> {
        signed_request("/slack/commands", "application/x-www-form-urlencoded", body)
    }

    #[tokio::test]
    async fn test_url_verification_skips_signature() {
        let app = TestApp::new().await;
        let req = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"type":"url_verification","challenge":"c-123"}"#))
            .unwrap();
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&bytes[..], b"c-123");
    }

    #[tokio::test]
    async fn test_unsigned_event_is_rejected() {
        let app = TestApp::new().await;
        let req = Request::builder()
            .method("POST")
            .uri("/slack/events")
            .body(Body::from(mention_event("app_mention", "")))
            .unwrap();
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(app.harness.mentions.save_calls(), 0);
    }

    #[tokio::test]
    async fn test_app_mention_starts_watch() {
        let app = TestApp::new().await;
        let req = signed_request(
            "/slack/events",
            "application/json",
            &mention_event("app_mention", ""),
        );
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let calls = app.harness.scheduler.calls();
        assert_eq!(calls.len(), 2, "Only U2 is watched; the bot is skipped");
        assert_eq!(calls[0].1, CallbackKind::Remind);
        assert_eq!(calls[0].2.user_id, "U2");
        assert_eq!(calls[0].2.parent_user_id.as_deref(), Some("U1"));
        assert_eq!(calls[0].2.message_ts, "100.0");
    }

    #[tokio::test]
    async fn test_bot_message_is_ignored() {
        let app = TestApp::new().await;
        let req = signed_request(
            "/slack/events",
            "application/json",
            &mention_event("app_mention", r#", "bot_id": "B1""#),
        );
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(app.harness.scheduler.calls().is_empty());
    }

    #[tokio::test]
    async fn test_plain_message_needs_opt_in() {
        let app = TestApp::new().await;
        let req = signed_request("/slack/events", "application/json", &mention_event("message", ""));
        app.router().oneshot(req).await.unwrap();
        assert!(app.harness.scheduler.calls().is_empty());

        let app = TestApp::with_config(|c| c.slack.watch_channel_messages = true).await;
        let req = signed_request("/slack/events", "application/json", &mention_event("message", ""));
        app.router().oneshot(req).await.unwrap();
        assert_eq!(app.harness.scheduler.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_lifecycle_error_is_still_acknowledged() {
        let app = TestApp::new().await;
        app.harness.scheduler.fail_after(0);
        let req = signed_request(
            "/slack/events",
            "application/json",
            &mention_event("app_mention", ""),
        );
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_set_manager_with_escaped_mention() {
        let app = TestApp::new().await;
        app.harness.tenants.insert("T1", None);
        let resp = app
            .router()
            .oneshot(command(
                "team_id=T1&user_id=U1&command=%2F_set_manager&text=%3C%40UM1%7Cmia%3E",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["response_type"], "ephemeral");
        assert_eq!(json["text"], "Manager set to <@UM1>.");
        assert_eq!(
            app.harness
                .tenants
                .get_tenant("T1")
                .unwrap()
                .manager_user_id
                .as_deref(),
            Some("UM1")
        );
    }

    #[tokio::test]
    async fn test_set_manager_without_argument_shows_usage() {
        let app = TestApp::new().await;
        let resp = app
            .router()
            .oneshot(command("team_id=T1&command=%2F_set_manager&text="))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(body_json(resp).await["text"].as_str().unwrap().contains("Usage"));
    }

    #[tokio::test]
    async fn test_get_and_unset_manager() {
        let app = TestApp::new().await;
        app.harness.tenants.insert("T1", Some("UM1"));

        let resp = app
            .router()
            .oneshot(command("team_id=T1&command=%2F_get_manager"))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["text"], "Current manager: <@UM1>");

        let resp = app
            .router()
            .oneshot(command("team_id=T1&command=%2Funset_manager"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            app.harness
                .tenants
                .get_tenant("T1")
                .unwrap()
                .manager_user_id
                .is_none()
        );

        let resp = app
            .router()
            .oneshot(command("team_id=T1&command=%2F_get_manager"))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["text"], "No manager is set.");
    }

    #[tokio::test]
    async fn test_command_for_unknown_team() {
        let app = TestApp::new().await;
        let resp = app
            .router()
            .oneshot(command("team_id=T404&command=%2F_get_manager"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["text"], "This workspace is not installed.");
    }

    #[tokio::test]
    async fn test_unknown_command_is_bad_request() {
        let app = TestApp::new().await;
        let resp = app
            .router()
            .oneshot(command("team_id=T1&command=%2Fdeploy"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(resp).await["response_type"], "ephemeral");
    }

    #[test]
    fn test_parse_command_form_decodes_fields() {
        let form = parse_command_form(b"team_id=T1&command=%2F_set_manager&text=%40alice+smith&token=x");
        assert_eq!(form.team_id, "T1");
        assert_eq!(form.command, "/_set_manager");
        assert_eq!(form.text, "@alice smith");
    }

    #[tokio::test]
    async fn test_oauth_redirect_requires_code() {
        let app = TestApp::new().await;
        let req = Request::builder()
            .uri("/slack/oauth_redirect")
            .body(Body::empty())
            .unwrap();
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oauth_redirect_installs_workspace() {
        let app = TestApp::with_fake_slack(|c| {
            c.slack.client_id = Some("cid".into());
            c.slack.client_secret = Some("csecret".into());
        })
        .await;
        let req = Request::builder()
            .uri("/slack/oauth_redirect?code=good")
            .body(Body::empty())
            .unwrap();
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        assert!(String::from_utf8_lossy(&bytes).contains("nudge is installed"));

        let tenant = app.harness.tenants.get_tenant("T_NEW").unwrap();
        assert_eq!(tenant.credential_ref, "slack_token_T_NEW");
        assert_eq!(
            app.store.get_secret("slack_token_T_NEW").await.unwrap().as_deref(),
            Some("xoxb-new")
        );
    }

    #[tokio::test]
    async fn test_oauth_redirect_rejected_code() {
        let app = TestApp::with_fake_slack(|c| {
            c.slack.client_id = Some("cid".into());
            c.slack.client_secret = Some("csecret".into());
        })
        .await;
        let req = Request::builder()
            .uri("/slack/oauth_redirect?code=bad")
            .body(Body::empty())
            .unwrap();
        let resp = app.router().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(
            body_json(resp).await["error"]
                .as_str()
                .unwrap()
                .contains("invalid_code")
        );
    }
}
