use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

fn require(value: &str, field: &'static str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::required(field))
    } else {
        Ok(())
    }
}

/// Identity of a watch record: one mentioned user under one parent message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MentionKey {
    pub team_id: String,
    pub channel_id: String,
    pub message_ts: String,
    pub user_id: String,
}

impl MentionKey {
    pub fn new(
        team_id: impl Into<String>,
        channel_id: impl Into<String>,
        message_ts: impl Into<String>,
        user_id: impl Into<String>,
    ) -> Self {
        Self {
            team_id: team_id.into(),
            channel_id: channel_id.into(),
            message_ts: message_ts.into(),
            user_id: user_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require(&self.team_id, "team_id")?;
        require(&self.channel_id, "channel_id")?;
        require(&self.message_ts, "message_ts")?;
        require(&self.user_id, "user_id")?;
        Ok(())
    }
}

/// `team:channel:ts:user`, used for log correlation.
impl fmt::Display for MentionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.team_id, self.channel_id, self.message_ts, self.user_id
        )
    }
}

/// Lifecycle position of a watch record, derived from its two flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MentionState {
    Detected,
    Reminded,
    Escalated,
}

impl MentionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Detected => "detected",
            Self::Reminded => "reminded",
            Self::Escalated => "escalated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Escalated)
    }
}

impl fmt::Display for MentionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted watch record for one (message, mentioned user) pair.
///
/// `reminded` and `escalated` only ever move from false to true.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionRecord {
    pub key: MentionKey,
    /// Epoch seconds at detection. Set once, preserved by repeated saves.
    pub created_at: i64,
    pub reminded: bool,
    pub escalated: bool,
}

impl MentionRecord {
    /// A freshly detected record with both flags cleared.
    pub fn detected(key: MentionKey, created_at: i64) -> Self {
        Self {
            key,
            created_at,
            reminded: false,
            escalated: false,
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.key.validate()?;
        if self.created_at <= 0 {
            return Err(ValidationError::positive("created_at"));
        }
        Ok(())
    }

    pub fn state(&self) -> MentionState {
        if self.escalated {
            MentionState::Escalated
        } else if self.reminded {
            MentionState::Reminded
        } else {
            MentionState::Detected
        }
    }
}

/// Per-workspace configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub team_id: String,
    /// `None` means the workspace is installed but has no escalation target.
    pub manager_user_id: Option<String>,
    /// Name of the secret holding this workspace's bot token.
    pub credential_ref: String,
    pub created_at: i64,
}

impl Tenant {
    pub fn validate(&self) -> Result<(), ValidationError> {
        require(&self.team_id, "team_id")?;
        require(&self.credential_ref, "credential_ref")?;
        if self.created_at <= 0 {
            return Err(ValidationError::positive("created_at"));
        }
        Ok(())
    }
}

/// The two delayed checks a mention schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    Remind,
    Escalate,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remind => "remind",
            Self::Escalate => "escalate",
        }
    }

    /// HTTP path the scheduler delivers this callback to.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Remind => "/check/remind",
            Self::Escalate => "/check/escalate",
        }
    }
}

impl fmt::Display for CallbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CallbackKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "remind" => Ok(Self::Remind),
            "escalate" => Ok(Self::Escalate),
            _ => Err(format!("Invalid callback kind: {}", s)),
        }
    }
}

/// Body carried through the scheduler to `/check/remind` and `/check/escalate`.
///
/// It is the only link between a mention and its later checks, so the watch
/// record key must be derivable from it alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub team_id: String,
    pub channel_id: String,
    pub message_ts: String,
    pub user_id: String,
    /// The user who wrote the mention.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_user_id: Option<String>,
}

impl TaskPayload {
    pub fn for_key(key: &MentionKey, parent_user_id: Option<String>) -> Self {
        Self {
            team_id: key.team_id.clone(),
            channel_id: key.channel_id.clone(),
            message_ts: key.message_ts.clone(),
            user_id: key.user_id.clone(),
            parent_user_id,
        }
    }

    pub fn key(&self) -> MentionKey {
        MentionKey::new(
            self.team_id.clone(),
            self.channel_id.clone(),
            self.message_ts.clone(),
            self.user_id.clone(),
        )
    }
}

/// A message that may contain mentions, as handed to `on_mention`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionEvent {
    pub team_id: String,
    pub channel_id: String,
    pub message_ts: String,
    pub text: String,
    pub bot_user_id: String,
    pub parent_user_id: Option<String>,
    /// Epoch seconds when the event was received.
    pub now: i64,
}
