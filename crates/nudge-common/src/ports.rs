//! Narrow interfaces the lifecycle orchestrator depends on.
//!
//! | Trait              | Production adapter                        |
//! |--------------------|-------------------------------------------|
//! | `MentionStore`     | `nudge::store::SqliteStore`               |
//! | `TenantStore`      | `nudge::store::SqliteStore`               |
//! | `ReplyOracle`      | `nudge::slack::SlackClient`               |
//! | `NotificationPort` | `nudge::slack::SlackClient`               |
//! | `SchedulerPort`    | `LocalScheduler` / `CloudTasksScheduler`  |

use async_trait::async_trait;

use crate::error::StoreError;
use crate::model::{CallbackKind, MentionKey, MentionRecord, TaskPayload, Tenant};

#[async_trait]
pub trait MentionStore: Send + Sync {
    /// Insert the record if its key is new. Repeating the call with the same
    /// key is a no-op: creation time and flags of the stored record win.
    async fn save(&self, record: &MentionRecord) -> Result<(), StoreError>;

    async fn find(&self, key: &MentionKey) -> Result<MentionRecord, StoreError>;

    /// Set `reminded`. Succeeds if already set; `NotFound` if the key is absent.
    async fn mark_reminded(&self, key: &MentionKey) -> Result<(), StoreError>;

    /// Set `escalated`. Succeeds if already set; `NotFound` if the key is absent.
    async fn mark_escalated(&self, key: &MentionKey) -> Result<(), StoreError>;
}

#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn get(&self, team_id: &str) -> Result<Tenant, StoreError>;

    /// `None` clears the manager. `NotFound` if the workspace was never installed.
    async fn set_manager(
        &self,
        team_id: &str,
        manager_user_id: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Create the tenant or replace its credential reference, keeping the
    /// original creation time and manager.
    async fn upsert_credential_ref(
        &self,
        team_id: &str,
        credential_ref: &str,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ReplyOracle: Send + Sync {
    /// Whether `user_id` has posted in the thread rooted at `parent_ts` since `since_ts`.
    async fn has_replied(
        &self,
        team_id: &str,
        channel_id: &str,
        parent_ts: &str,
        user_id: &str,
        since_ts: &str,
    ) -> anyhow::Result<bool>;
}

#[async_trait]
pub trait NotificationPort: Send + Sync {
    async fn post_to_thread(
        &self,
        team_id: &str,
        channel_id: &str,
        parent_ts: &str,
        text: &str,
    ) -> anyhow::Result<()>;

    async fn post_direct(&self, team_id: &str, user_id: &str, text: &str) -> anyhow::Result<()>;
}

#[async_trait]
pub trait SchedulerPort: Send + Sync {
    /// Deliver `callback` with `payload` at or after `run_at` (epoch seconds).
    async fn schedule_at(
        &self,
        run_at: i64,
        callback: CallbackKind,
        payload: &TaskPayload,
    ) -> anyhow::Result<()>;
}
