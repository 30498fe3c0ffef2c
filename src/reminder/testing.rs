//! In-memory port doubles shared by unit tests.
//!
//! Real implementations: `SqliteStore`, `SlackClient`, `LocalScheduler`.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use nudge_common::{
    CallbackKind, MentionKey, MentionRecord, MentionStore, NotificationPort, ReplyOracle,
    SchedulerPort, StoreError, TaskPayload, Tenant, TenantStore,
};

use super::lifecycle::LifecyclePorts;

#[derive(Default)]
pub struct FakeMentionStore {
    records: Mutex<HashMap<MentionKey, MentionRecord>>,
    saves: AtomicUsize,
    mark_failures: AtomicU32,
}

impl FakeMentionStore {
    pub fn insert(&self, record: MentionRecord) {
        self.records.lock().unwrap().insert(record.key.clone(), record);
    }

    pub fn get(&self, key: &MentionKey) -> Option<MentionRecord> {
        self.records.lock().unwrap().get(key).cloned()
    }

    pub fn save_calls(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make the next `n` flag writes fail with a backend error.
    pub fn fail_marks(&self, n: u32) {
        self.mark_failures.store(n, Ordering::SeqCst);
    }

    fn mark(&self, key: &MentionKey, apply: impl FnOnce(&mut MentionRecord)) -> Result<(), StoreError> {
        if self
            .mark_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StoreError::Backend(anyhow::anyhow!("database is locked")));
        }
        let mut records = self.records.lock().unwrap();
        let record = records.get_mut(key).ok_or(StoreError::NotFound)?;
        apply(record);
        Ok(())
    }
}

#[async_trait]
impl MentionStore for FakeMentionStore {
    async fn save(&self, record: &MentionRecord) -> Result<(), StoreError> {
        record.validate()?;
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.records
            .lock()
            .unwrap()
            .entry(record.key.clone())
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn find(&self, key: &MentionKey) -> Result<MentionRecord, StoreError> {
        self.get(key).ok_or(StoreError::NotFound)
    }

    async fn mark_reminded(&self, key: &MentionKey) -> Result<(), StoreError> {
        self.mark(key, |r| r.reminded = true)
    }

    async fn mark_escalated(&self, key: &MentionKey) -> Result<(), StoreError> {
        self.mark(key, |r| r.escalated = true)
    }
}

#[derive(Default)]
pub struct FakeTenantStore {
    tenants: Mutex<HashMap<String, Tenant>>,
    failing: AtomicBool,
}

impl FakeTenantStore {
    pub fn insert(&self, team_id: &str, manager: Option<&str>) {
        self.tenants.lock().unwrap().insert(
            team_id.to_string(),
            Tenant {
                team_id: team_id.to_string(),
                manager_user_id: manager.map(str::to_string),
                credential_ref: format!("slack_token_{}", team_id),
                created_at: 1,
            },
        );
    }

    pub fn get_tenant(&self, team_id: &str) -> Option<Tenant> {
        self.tenants.lock().unwrap().get(team_id).cloned()
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("tenant store offline")));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for FakeTenantStore {
    async fn get(&self, team_id: &str) -> Result<Tenant, StoreError> {
        self.check()?;
        self.get_tenant(team_id).ok_or(StoreError::NotFound)
    }

    async fn set_manager(
        &self,
        team_id: &str,
        manager_user_id: Option<&str>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut tenants = self.tenants.lock().unwrap();
        let tenant = tenants.get_mut(team_id).ok_or(StoreError::NotFound)?;
        tenant.manager_user_id = manager_user_id.map(str::to_string);
        Ok(())
    }

    async fn upsert_credential_ref(
        &self,
        team_id: &str,
        credential_ref: &str,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut tenants = self.tenants.lock().unwrap();
        tenants
            .entry(team_id.to_string())
            .and_modify(|t| t.credential_ref = credential_ref.to_string())
            .or_insert_with(|| Tenant {
                team_id: team_id.to_string(),
                manager_user_id: None,
                credential_ref: credential_ref.to_string(),
                created_at: 1,
            });
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeReplies {
    replied: Mutex<HashSet<String>>,
    failing: AtomicBool,
}

impl FakeReplies {
    pub fn mark_replied(&self, user_id: &str) {
        self.replied.lock().unwrap().insert(user_id.to_string());
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReplyOracle for FakeReplies {
    async fn has_replied(
        &self,
        _team_id: &str,
        _channel_id: &str,
        _parent_ts: &str,
        user_id: &str,
        _since_ts: &str,
    ) -> anyhow::Result<bool> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("conversations.replies timed out");
        }
        Ok(self.replied.lock().unwrap().contains(user_id))
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    threads: Mutex<Vec<(String, String, String)>>,
    directs: Mutex<Vec<(String, String)>>,
    failing: AtomicBool,
    failing_direct: AtomicBool,
}

impl RecordingNotifier {
    /// `(channel, parent_ts, text)` per thread post.
    pub fn thread_posts(&self) -> Vec<(String, String, String)> {
        self.threads.lock().unwrap().clone()
    }

    /// `(user, text)` per DM.
    pub fn direct_posts(&self) -> Vec<(String, String)> {
        self.directs.lock().unwrap().clone()
    }

    /// Fail both primitives.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Fail only `post_direct`.
    pub fn fail_direct(&self, failing: bool) {
        self.failing_direct.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl NotificationPort for RecordingNotifier {
    async fn post_to_thread(
        &self,
        _team_id: &str,
        channel_id: &str,
        parent_ts: &str,
        text: &str,
    ) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("chat.postMessage failed: channel_not_found");
        }
        self.threads.lock().unwrap().push((
            channel_id.to_string(),
            parent_ts.to_string(),
            text.to_string(),
        ));
        Ok(())
    }

    async fn post_direct(&self, _team_id: &str, user_id: &str, text: &str) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) || self.failing_direct.load(Ordering::SeqCst) {
            anyhow::bail!("conversations.open failed");
        }
        self.directs
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingScheduler {
    calls: Mutex<Vec<(i64, CallbackKind, TaskPayload)>>,
    succeed_limit: Mutex<Option<usize>>,
}

impl RecordingScheduler {
    pub fn calls(&self) -> Vec<(i64, CallbackKind, TaskPayload)> {
        self.calls.lock().unwrap().clone()
    }

    /// Accept the next `n` schedule calls, then fail every one after.
    pub fn fail_after(&self, n: usize) {
        let accepted = self.calls().len();
        *self.succeed_limit.lock().unwrap() = Some(accepted + n);
    }
}

#[async_trait]
impl SchedulerPort for RecordingScheduler {
    async fn schedule_at(
        &self,
        run_at: i64,
        callback: CallbackKind,
        payload: &TaskPayload,
    ) -> anyhow::Result<()> {
        let mut calls = self.calls.lock().unwrap();
        if let Some(limit) = *self.succeed_limit.lock().unwrap()
            && calls.len() >= limit
        {
            anyhow::bail!("queue unavailable");
        }
        calls.push((run_at, callback, payload.clone()));
        Ok(())
    }
}

/// One of each fake, wired together.
#[derive(Default)]
pub struct Harness {
    pub mentions: Arc<FakeMentionStore>,
    pub tenants: Arc<FakeTenantStore>,
    pub replies: Arc<FakeReplies>,
    pub notifier: Arc<RecordingNotifier>,
    pub scheduler: Arc<RecordingScheduler>,
}

impl Harness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ports(&self) -> LifecyclePorts {
        LifecyclePorts {
            mentions: self.mentions.clone(),
            tenants: self.tenants.clone(),
            replies: self.replies.clone(),
            notifier: self.notifier.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}
