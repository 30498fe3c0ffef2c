//! SQLite-backed scheduler and the in-process worker that drains it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use nudge_common::{CallbackKind, SchedulerPort, TaskPayload};
use tokio::sync::watch;

use crate::errors::LifecycleError;
use crate::reminder::{CheckOutcome, MentionLifecycle};
use crate::store::{DbHandle, NudgeDb, ScheduledTask};

/// Writes callbacks into the `scheduled_tasks` table.
#[derive(Clone)]
pub struct LocalScheduler {
    db: DbHandle,
}

impl LocalScheduler {
    pub fn new(db: DbHandle) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SchedulerPort for LocalScheduler {
    async fn schedule_at(
        &self,
        run_at: i64,
        callback: CallbackKind,
        payload: &TaskPayload,
    ) -> Result<()> {
        let body = serde_json::to_string(payload).context("Failed to encode task payload")?;
        let task_key = payload.key().to_string();
        let now = chrono::Utc::now().timestamp();
        let queued = self
            .db
            .call(move |db| db.enqueue_task(callback, &task_key, run_at, &body, now))
            .await?;
        if !queued {
            tracing::debug!(key = %payload.key(), callback = %callback, "Task already queued");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    /// Attempts before a task is marked dead.
    pub max_attempts: u32,
    pub batch_size: u32,
    /// How long a leased task stays hidden from other polls.
    pub lease: Duration,
    /// Deadline for a single check.
    pub task_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            max_attempts: 8,
            batch_size: 32,
            lease: Duration::from_secs(120),
            task_timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(30),
            backoff_cap: Duration::from_secs(15 * 60),
        }
    }
}

impl WorkerConfig {
    /// Delay before retry number `attempts` (1-based): base, 2×base, 4×base, … up to the cap.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let exp = attempts.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_cap)
    }
}

/// Counts from one polling pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickStats {
    pub completed: usize,
    pub retried: usize,
    pub dead: usize,
    /// Tasks whose result could not be written back; they rerun once the lease lapses.
    pub unsettled: usize,
}

/// Polls `scheduled_tasks` and runs due checks against the lifecycle.
pub struct TaskWorker {
    db: DbHandle,
    lifecycle: Arc<MentionLifecycle>,
    config: WorkerConfig,
}

impl TaskWorker {
    pub fn new(db: DbHandle, lifecycle: Arc<MentionLifecycle>, config: WorkerConfig) -> Self {
        Self {
            db,
            lifecycle,
            config,
        }
    }

    /// Poll until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            max_attempts = self.config.max_attempts,
            "Task worker started"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = chrono::Utc::now().timestamp();
                    if let Err(e) = self.tick(now).await {
                        tracing::error!(error = %e, "Task worker poll failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("Task worker stopped");
    }

    /// Run every task due at `now`.
    pub async fn tick(&self, now: i64) -> Result<TickStats> {
        let limit = self.config.batch_size;
        let lease = self.config.lease.as_secs() as i64;
        let tasks = self
            .db
            .call(move |db| db.lease_due_tasks(now, limit, lease))
            .await?;

        let mut stats = TickStats::default();
        for task in tasks {
            let id = task.id;
            match self.dispatch(&task).await {
                Ok(outcome) => {
                    tracing::debug!(task_id = id, callback = %task.callback, outcome = outcome.as_str(), "Task completed");
                    if self.settle(id, move |db| db.complete_task(id)).await {
                        stats.completed += 1;
                    } else {
                        stats.unsettled += 1;
                    }
                }
                Err(DispatchError::Unreadable(reason)) => {
                    tracing::error!(task_id = id, error = %reason, "Dropping unreadable task");
                    if self.settle(id, move |db| db.kill_task(id, &reason)).await {
                        stats.dead += 1;
                    } else {
                        stats.unsettled += 1;
                    }
                }
                Err(DispatchError::Failed(reason)) if task.attempts >= self.config.max_attempts => {
                    tracing::error!(
                        task_id = id,
                        callback = %task.callback,
                        attempts = task.attempts,
                        error = %reason,
                        "Task exhausted its attempts"
                    );
                    if self.settle(id, move |db| db.kill_task(id, &reason)).await {
                        stats.dead += 1;
                    } else {
                        stats.unsettled += 1;
                    }
                }
                Err(DispatchError::Failed(reason)) => {
                    let retry_at = now + self.config.backoff(task.attempts).as_secs() as i64;
                    tracing::warn!(
                        task_id = id,
                        callback = %task.callback,
                        attempts = task.attempts,
                        retry_at,
                        error = %reason,
                        "Task failed, will retry"
                    );
                    if self
                        .settle(id, move |db| db.retry_task(id, retry_at, &reason))
                        .await
                    {
                        stats.retried += 1;
                    } else {
                        stats.unsettled += 1;
                    }
                }
            }
        }
        Ok(stats)
    }

    /// Write a task's result back. A failure only affects this row.
    async fn settle<F>(&self, id: i64, write: F) -> bool
    where
        F: FnOnce(&NudgeDb) -> Result<()> + Send + 'static,
    {
        match self.db.call(write).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(task_id = id, error = %e, "Failed to record task result");
                false
            }
        }
    }

    async fn dispatch(&self, task: &ScheduledTask) -> Result<CheckOutcome, DispatchError> {
        let payload: TaskPayload = serde_json::from_str(&task.payload)
            .map_err(|e| DispatchError::Unreadable(format!("invalid payload: {}", e)))?;

        let check = async {
            match task.callback {
                CallbackKind::Remind => self.lifecycle.check_remind(&payload).await,
                CallbackKind::Escalate => self.lifecycle.check_escalate(&payload).await,
            }
        };
        match tokio::time::timeout(self.config.task_timeout, check).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(LifecycleError::Invalid { source, .. })) => {
                Err(DispatchError::Unreadable(source.to_string()))
            }
            Ok(Err(e)) => Err(DispatchError::Failed(e.to_string())),
            Err(_) => Err(DispatchError::Failed(format!(
                "timed out after {}s",
                self.config.task_timeout.as_secs()
            ))),
        }
    }
}

enum DispatchError {
    /// Retrying cannot help.
    Unreadable(String),
    Failed(String),
}
