//! Wire types for inbound Slack requests and Web API responses.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

// ── Events API ────────────────────────────────────────────────────────

/// Top-level body POSTed to the Events API endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventEnvelope {
    UrlVerification {
        challenge: String,
    },
    EventCallback(EventCallback),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventCallback {
    pub team_id: String,
    #[serde(default)]
    pub event_id: Option<String>,
    #[serde(default)]
    pub authorizations: Vec<Authorization>,
    pub event: InnerEvent,
}

impl EventCallback {
    /// The bot user this installation acts as, if Slack told us.
    pub fn bot_user_id(&self) -> Option<&str> {
        self.authorizations
            .iter()
            .find(|a| a.is_bot)
            .map(|a| a.user_id.as_str())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    pub user_id: String,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InnerEvent {
    AppMention(MessageEvent),
    Message(MessageEvent),
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageEvent {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub text: String,
    pub ts: String,
    pub channel: String,
    #[serde(default)]
    pub bot_id: Option<String>,
    #[serde(default)]
    pub subtype: Option<String>,
}

impl MessageEvent {
    /// Messages written by bots (including ourselves) never start a watch.
    pub fn is_from_bot(&self) -> bool {
        self.bot_id.as_deref().is_some_and(|id| !id.is_empty())
            || self.subtype.as_deref() == Some("bot_message")
    }
}

// ── Slash commands ────────────────────────────────────────────────────

/// Form body of a slash command request (only the fields we use).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SlashCommandForm {
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub text: String,
}

/// The manager-administration commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlashCommand {
    /// `/_set_manager @user`; the argument is the raw text after the command.
    SetManager(String),
    UnsetManager,
    GetManager,
}

impl SlashCommand {
    /// Parse a command name and its text. The leading underscore is optional.
    pub fn parse(command: &str, text: &str) -> Result<Self, String> {
        let name = command.trim().trim_start_matches('/').trim_start_matches('_');
        match name {
            "set_manager" => Ok(SlashCommand::SetManager(text.trim().to_string())),
            "unset_manager" => Ok(SlashCommand::UnsetManager),
            "get_manager" => Ok(SlashCommand::GetManager),
            _ => Err(format!("Unknown command: {}", command)),
        }
    }
}

static ESCAPED_USER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^<@([A-Z0-9]+)(?:\|[^>]*)?>$").unwrap());

/// How the `/_set_manager` argument names the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserRef {
    /// Slack escaped the mention to `<@U123|name>`; no lookup needed.
    Id(String),
    /// A display name, real name or email to look up.
    Name(String),
}

impl UserRef {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        if let Some(caps) = ESCAPED_USER.captures(text) {
            return Some(UserRef::Id(caps[1].to_string()));
        }
        let name = text.trim_start_matches('@').trim();
        if name.is_empty() {
            None
        } else {
            Some(UserRef::Name(name.to_string()))
        }
    }
}

/// JSON reply to a slash command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlashResponse {
    pub response_type: String,
    pub text: String,
}

impl SlashResponse {
    pub fn ephemeral(text: impl Into<String>) -> Self {
        Self {
            response_type: "ephemeral".to_string(),
            text: text.into(),
        }
    }
}

// ── Web API responses ─────────────────────────────────────────────────

/// The `{"ok": bool, "error": ...}` envelope every Web API method returns.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope {
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RepliesResponse {
    #[serde(default)]
    pub messages: Vec<ThreadMessage>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThreadMessage {
    #[serde(default)]
    pub user: Option<String>,
    pub ts: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenConversationResponse {
    pub channel: ChannelRef,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UsersListResponse {
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMetadata {
    #[serde(default)]
    pub next_cursor: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub real_name: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub profile: Profile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl Member {
    /// Whether `query` names this member by handle, display name, real name or email.
    pub fn matches(&self, query: &str) -> bool {
        let eq = |v: Option<&str>| v.is_some_and(|v| !v.is_empty() && v.eq_ignore_ascii_case(query));
        eq(Some(&self.name))
            || eq(self.real_name.as_deref())
            || eq(self.profile.display_name.as_deref())
            || eq(self.profile.email.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthAccessResponse {
    pub access_token: String,
    pub team: OAuthTeam,
    #[serde(default)]
    pub bot_user_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthTeam {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_verification_envelope() {
        let env: EventEnvelope =
            serde_json::from_str(r#"{"type":"url_verification","challenge":"abc","token":"x"}"#)
                .unwrap();
        match env {
            EventEnvelope::UrlVerification { challenge } => assert_eq!(challenge, "abc"),
            other => panic!("Expected UrlVerification, got {:?}", other),
        }
    }

    #[test]
    fn test_app_mention_envelope() {
        let env: EventEnvelope = serde_json::from_str(
            r#"{
                "type": "event_callback",
                "team_id": "T1",
                "event_id": "Ev1",
                "authorizations": [{"user_id": "B1", "is_bot": true}],
                "event": {
                    "type": "app_mention",
                    "user": "U1",
                    "text": "<@B1> <@U9> please check",
                    "ts": "100.0",
                    "channel": "C1",
                    "event_ts": "100.0"
                }
            }"#,
        )
        .unwrap();
        let EventEnvelope::EventCallback(cb) = env else {
            panic!("Expected EventCallback");
        };
        assert_eq!(cb.team_id, "T1");
        assert_eq!(cb.bot_user_id(), Some("B1"));
        match cb.event {
            InnerEvent::AppMention(msg) => {
                assert_eq!(msg.user.as_deref(), Some("U1"));
                assert_eq!(msg.channel, "C1");
                assert!(!msg.is_from_bot());
            }
            other => panic!("Expected AppMention, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_types_are_tolerated() {
        let env: EventEnvelope =
            serde_json::from_str(r#"{"type":"app_rate_limited","minute_rate_limited":1}"#).unwrap();
        assert!(matches!(env, EventEnvelope::Unknown));

        let env: EventEnvelope = serde_json::from_str(
            r#"{"type":"event_callback","team_id":"T1","event":{"type":"reaction_added","user":"U1"}}"#,
        )
        .unwrap();
        let EventEnvelope::EventCallback(cb) = env else {
            panic!("Expected EventCallback");
        };
        assert!(matches!(cb.event, InnerEvent::Other));
        assert_eq!(cb.bot_user_id(), None);
    }

    #[test]
    fn test_bot_messages_detected() {
        let msg: MessageEvent = serde_json::from_str(
            r#"{"text":"hi","ts":"1.0","channel":"C1","subtype":"bot_message"}"#,
        )
        .unwrap();
        assert!(msg.is_from_bot());

        let msg: MessageEvent =
            serde_json::from_str(r#"{"text":"hi","ts":"1.0","channel":"C1","bot_id":"B9"}"#)
                .unwrap();
        assert!(msg.is_from_bot());
    }

    #[test]
    fn test_slash_command_parse() {
        assert_eq!(
            SlashCommand::parse("/_set_manager", " @alice "),
            Ok(SlashCommand::SetManager("@alice".to_string()))
        );
        assert_eq!(
            SlashCommand::parse("/unset_manager", ""),
            Ok(SlashCommand::UnsetManager)
        );
        assert_eq!(SlashCommand::parse("/_get_manager", ""), Ok(SlashCommand::GetManager));
        assert!(SlashCommand::parse("/deploy", "").is_err());
    }

    #[test]
    fn test_user_ref_parse() {
        assert_eq!(UserRef::parse("<@U123|alice>"), Some(UserRef::Id("U123".into())));
        assert_eq!(UserRef::parse("<@U123>"), Some(UserRef::Id("U123".into())));
        assert_eq!(UserRef::parse("@alice"), Some(UserRef::Name("alice".into())));
        assert_eq!(
            UserRef::parse("alice@example.com"),
            Some(UserRef::Name("alice@example.com".into()))
        );
        assert_eq!(UserRef::parse("  "), None);
        assert_eq!(UserRef::parse("@"), None);
    }

    #[test]
    fn test_member_matches() {
        let member: Member = serde_json::from_str(
            r#"{"id":"U1","name":"alice","real_name":"Alice Liddell","profile":{"email":"alice@example.com","display_name":"ali"}}"#,
        )
        .unwrap();
        assert!(member.matches("alice"));
        assert!(member.matches("Alice Liddell"));
        assert!(member.matches("ALICE@example.com"));
        assert!(member.matches("ali"));
        assert!(!member.matches("bob"));
        assert!(!member.matches(""));
    }
}
