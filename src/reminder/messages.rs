//! Text templates for reminder, escalation and manager DM messages.
//!
//! Placeholders: `{user}`, `{team}`, `{channel}`, `{ts}`, `{thread_url}`.

use nudge_common::MentionKey;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageTemplates {
    /// Posted in-thread when the remind window elapses without a reply.
    #[serde(default = "default_remind")]
    pub remind: String,
    /// Posted in-thread when the escalate window elapses without a reply.
    #[serde(default = "default_escalate")]
    pub escalate: String,
    /// Sent to the tenant's manager, if one is configured.
    #[serde(default = "default_manager_dm")]
    pub manager_dm: String,
}

fn default_remind() -> String {
    "<@{user}> friendly reminder: please reply here when you get a chance. (automatic reminder)"
        .to_string()
}

fn default_escalate() -> String {
    "<@{user}> this still looks unanswered. Please share at least an ETA. (automatic reminder)"
        .to_string()
}

fn default_manager_dm() -> String {
    "[Escalation] <@{user}> has not replied yet. Thread: {thread_url}".to_string()
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            remind: default_remind(),
            escalate: default_escalate(),
            manager_dm: default_manager_dm(),
        }
    }
}

impl MessageTemplates {
    pub fn remind_text(&self, key: &MentionKey) -> String {
        render(&self.remind, key)
    }

    pub fn escalate_text(&self, key: &MentionKey) -> String {
        render(&self.escalate, key)
    }

    pub fn manager_dm_text(&self, key: &MentionKey) -> String {
        render(&self.manager_dm, key)
    }
}

/// Web link to the thread rooted at the mention's parent message.
pub fn thread_url(key: &MentionKey) -> String {
    format!(
        "https://app.slack.com/client/{}/{}/thread/{}",
        key.team_id, key.channel_id, key.message_ts
    )
}

fn render(template: &str, key: &MentionKey) -> String {
    // thread_url first: its expansion contains no placeholders of its own
    template
        .replace("{thread_url}", &thread_url(key))
        .replace("{user}", &key.user_id)
        .replace("{team}", &key.team_id)
        .replace("{channel}", &key.channel_id)
        .replace("{ts}", &key.message_ts)
}
