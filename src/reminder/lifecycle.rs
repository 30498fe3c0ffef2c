//! The mention lifecycle: watch, remind, escalate.
//!
//! ```text
//! Detected ──check_remind, no reply──▶ Reminded ──check_escalate, no reply──▶ Escalated
//!     └──────────────────check_escalate, no reply────────────────────────────────▲
//! ```
//!
//! A reply is never recorded; it simply turns every later check into a no-op.
//! Callbacks arrive at-least-once and possibly out of order, so every
//! transition re-reads the record and tolerates it being gone or already done.

use std::sync::Arc;

use anyhow::Result;
use chrono::Duration;
use nudge_common::{
    CallbackKind, MentionEvent, MentionKey, MentionRecord, MentionStore, NotificationPort,
    ReplyOracle, SchedulerPort, StoreError, TaskPayload, TenantStore,
};

use super::extract::mentioned_users;
use super::messages::MessageTemplates;
use crate::errors::LifecycleError;

/// Windows and retry settings for the lifecycle.
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub remind_after: Duration,
    pub escalate_after: Duration,
    /// Attempts at writing a completion flag after a notification went out.
    pub flag_write_attempts: u32,
    pub messages: MessageTemplates,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            remind_after: Duration::minutes(10),
            escalate_after: Duration::minutes(30),
            flag_write_attempts: 3,
            messages: MessageTemplates::default(),
        }
    }
}

impl LifecycleConfig {
    pub fn validate(&self) -> Result<()> {
        if self.remind_after <= Duration::zero() {
            anyhow::bail!("remind window must be greater than zero");
        }
        if self.escalate_after <= self.remind_after {
            anyhow::bail!(
                "escalate window ({}s) must be longer than remind window ({}s)",
                self.escalate_after.num_seconds(),
                self.remind_after.num_seconds()
            );
        }
        if self.flag_write_attempts == 0 {
            anyhow::bail!("flag_write_attempts must be at least 1");
        }
        Ok(())
    }
}

/// The collaborators the lifecycle drives.
#[derive(Clone)]
pub struct LifecyclePorts {
    pub mentions: Arc<dyn MentionStore>,
    pub tenants: Arc<dyn TenantStore>,
    pub replies: Arc<dyn ReplyOracle>,
    pub notifier: Arc<dyn NotificationPort>,
    pub scheduler: Arc<dyn SchedulerPort>,
}

/// What a `check_remind`/`check_escalate` call ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// No watch record for the payload's key.
    Stale,
    /// The flag this check sets was already set (or the record is terminal).
    AlreadyDone,
    /// The mentioned user replied; nothing was posted.
    Replied,
    /// Notifications went out and the flag was set.
    Notified,
}

impl CheckOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stale => "stale",
            Self::AlreadyDone => "already_done",
            Self::Replied => "replied",
            Self::Notified => "notified",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Flag {
    Reminded,
    Escalated,
}

impl Flag {
    fn as_str(&self) -> &'static str {
        match self {
            Flag::Reminded => "reminded",
            Flag::Escalated => "escalated",
        }
    }
}

pub struct MentionLifecycle {
    ports: LifecyclePorts,
    config: LifecycleConfig,
}

impl MentionLifecycle {
    /// Build the orchestrator. Fails if the configured windows are inconsistent.
    pub fn new(ports: LifecyclePorts, config: LifecycleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { ports, config })
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Start watching every user mentioned in `event`.
    ///
    /// Each user gets a watch record and two scheduled callbacks. A failure
    /// aborts the remaining users; users already processed are not rolled back
    /// since repeating the event is safe. Returns the number of users watched.
    pub async fn on_mention(&self, event: &MentionEvent) -> Result<usize, LifecycleError> {
        let users = mentioned_users(&event.text, &event.bot_user_id);
        if users.is_empty() {
            tracing::debug!(
                team = %event.team_id,
                channel = %event.channel_id,
                ts = %event.message_ts,
                "No user mentions in message"
            );
            return Ok(0);
        }

        for user_id in &users {
            let key = MentionKey::new(
                event.team_id.clone(),
                event.channel_id.clone(),
                event.message_ts.clone(),
                user_id.clone(),
            );
            self.watch(&key, event).await?;
        }
        Ok(users.len())
    }

    async fn watch(&self, key: &MentionKey, event: &MentionEvent) -> Result<(), LifecycleError> {
        let record = MentionRecord::detected(key.clone(), event.now);
        record
            .validate()
            .map_err(|source| LifecycleError::Invalid {
                key: key.to_string(),
                source,
            })?;

        self.ports
            .mentions
            .save(&record)
            .await
            .map_err(|e| match e {
                StoreError::Invalid(source) => LifecycleError::Invalid {
                    key: key.to_string(),
                    source,
                },
                source => LifecycleError::PersistenceFailed {
                    key: key.to_string(),
                    source,
                },
            })?;

        let payload = TaskPayload::for_key(key, event.parent_user_id.clone());
        for (callback, window) in [
            (CallbackKind::Remind, self.config.remind_after),
            (CallbackKind::Escalate, self.config.escalate_after),
        ] {
            let run_at = event.now + window.num_seconds();
            self.ports
                .scheduler
                .schedule_at(run_at, callback, &payload)
                .await
                .map_err(|source| LifecycleError::ScheduleFailed {
                    key: key.to_string(),
                    callback,
                    source,
                })?;
        }

        tracing::info!(key = %key, created_at = event.now, "Watching mention");
        Ok(())
    }

    /// Remind the mentioned user in-thread if they have not replied yet.
    pub async fn check_remind(&self, payload: &TaskPayload) -> Result<CheckOutcome, LifecycleError> {
        let key = payload.key();
        let Some(record) = self.load(&key).await? else {
            tracing::info!(key = %key, "Skipping remind check for unknown mention");
            return Ok(CheckOutcome::Stale);
        };
        if record.reminded || record.escalated {
            tracing::debug!(key = %key, state = %record.state(), "Remind already handled");
            return Ok(CheckOutcome::AlreadyDone);
        }
        if self.has_replied(&key).await? {
            tracing::info!(key = %key, "User replied before remind window");
            return Ok(CheckOutcome::Replied);
        }

        let text = self.config.messages.remind_text(&key);
        self.ports
            .notifier
            .post_to_thread(&key.team_id, &key.channel_id, &key.message_ts, &text)
            .await
            .map_err(|source| LifecycleError::NotifyFailed {
                key: key.to_string(),
                source,
            })?;

        self.mark(&key, Flag::Reminded).await?;
        tracing::info!(key = %key, "Reminder posted");
        Ok(CheckOutcome::Notified)
    }

    /// Re-notify in-thread and DM the tenant's manager if there is still no reply.
    pub async fn check_escalate(
        &self,
        payload: &TaskPayload,
    ) -> Result<CheckOutcome, LifecycleError> {
        let key = payload.key();
        let Some(record) = self.load(&key).await? else {
            tracing::info!(key = %key, "Skipping escalate check for unknown mention");
            return Ok(CheckOutcome::Stale);
        };
        if record.escalated {
            tracing::debug!(key = %key, "Escalation already handled");
            return Ok(CheckOutcome::AlreadyDone);
        }
        if self.has_replied(&key).await? {
            tracing::info!(key = %key, "User replied before escalate window");
            return Ok(CheckOutcome::Replied);
        }

        let text = self.config.messages.escalate_text(&key);
        self.ports
            .notifier
            .post_to_thread(&key.team_id, &key.channel_id, &key.message_ts, &text)
            .await
            .map_err(|source| LifecycleError::NotifyFailed {
                key: key.to_string(),
                source,
            })?;

        self.notify_manager(&key).await?;

        if !record.reminded {
            self.mark(&key, Flag::Reminded).await?;
        }
        self.mark(&key, Flag::Escalated).await?;
        tracing::info!(key = %key, "Mention escalated");
        Ok(CheckOutcome::Notified)
    }

    async fn notify_manager(&self, key: &MentionKey) -> Result<(), LifecycleError> {
        let tenant = match self.ports.tenants.get(&key.team_id).await {
            Ok(tenant) => tenant,
            Err(e) if e.is_not_found() => {
                tracing::info!(key = %key, "Team not installed, skipping manager DM");
                return Ok(());
            }
            Err(source) => {
                return Err(LifecycleError::TenantLookupFailed {
                    team_id: key.team_id.clone(),
                    source,
                });
            }
        };

        let Some(manager) = tenant.manager_user_id else {
            tracing::info!(key = %key, "No manager configured, skipping manager DM");
            return Ok(());
        };

        let text = self.config.messages.manager_dm_text(key);
        self.ports
            .notifier
            .post_direct(&key.team_id, &manager, &text)
            .await
            .map_err(|source| LifecycleError::NotifyFailed {
                key: key.to_string(),
                source,
            })?;
        tracing::info!(key = %key, manager = %manager, "Manager notified");
        Ok(())
    }

    async fn load(&self, key: &MentionKey) -> Result<Option<MentionRecord>, LifecycleError> {
        key.validate().map_err(|source| LifecycleError::Invalid {
            key: key.to_string(),
            source,
        })?;
        match self.ports.mentions.find(key).await {
            Ok(record) => Ok(Some(record)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(source) => Err(LifecycleError::PersistenceFailed {
                key: key.to_string(),
                source,
            }),
        }
    }

    async fn has_replied(&self, key: &MentionKey) -> Result<bool, LifecycleError> {
        // Any post by the user after the parent message counts as a reply.
        self.ports
            .replies
            .has_replied(
                &key.team_id,
                &key.channel_id,
                &key.message_ts,
                &key.user_id,
                &key.message_ts,
            )
            .await
            .map_err(|source| LifecycleError::ReplyCheckFailed {
                key: key.to_string(),
                source,
            })
    }

    /// Set a completion flag, retrying transient store failures.
    ///
    /// A record deleted in the meantime is not an error.
    async fn mark(&self, key: &MentionKey, flag: Flag) -> Result<(), LifecycleError> {
        let attempts = self.config.flag_write_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match flag {
                Flag::Reminded => self.ports.mentions.mark_reminded(key).await,
                Flag::Escalated => self.ports.mentions.mark_escalated(key).await,
            };
            match result {
                Ok(()) => return Ok(()),
                Err(e) if e.is_not_found() => {
                    tracing::warn!(key = %key, flag = flag.as_str(), "Mention removed before flag write");
                    return Ok(());
                }
                Err(source) if attempt >= attempts => {
                    tracing::error!(
                        key = %key,
                        flag = flag.as_str(),
                        attempts,
                        error = %source,
                        "Flag write failed after notification"
                    );
                    return Err(LifecycleError::PersistenceFailed {
                        key: key.to_string(),
                        source,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        flag = flag.as_str(),
                        attempt,
                        error = %e,
                        "Flag write failed, retrying"
                    );
                    tokio::time::sleep(std::time::Duration::from_millis(50 * u64::from(attempt)))
                        .await;
                    attempt += 1;
                }
            }
        }
    }
}
