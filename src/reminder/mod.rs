//! Mention lifecycle orchestration.
//!
//! - `extract`: pulls `<@USER>` mentions out of message text
//! - `lifecycle`: `on_mention`, `check_remind`, `check_escalate`
//! - `messages`: configurable reminder and escalation text

pub mod extract;
pub mod lifecycle;
pub mod messages;

#[cfg(test)]
pub(crate) mod testing;

pub use extract::mentioned_users;
pub use lifecycle::{CheckOutcome, LifecycleConfig, LifecyclePorts, MentionLifecycle};
pub use messages::{MessageTemplates, thread_url};
