use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use nudge_common::{CallbackKind, MentionKey, MentionRecord, Tenant};
use rusqlite::{Connection, OptionalExtension, Row, params};

/// Async-safe handle to the nudge database.
///
/// Wraps `NudgeDb` behind `Arc<Mutex>` and runs all access on tokio's
/// blocking thread pool via `spawn_blocking`, so synchronous SQLite I/O never
/// ties up async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<NudgeDb>>,
}

impl DbHandle {
    pub fn new(db: NudgeDb) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Open the database at `path`, creating parent directories as needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        Ok(Self::new(NudgeDb::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(NudgeDb::new_in_memory()?))
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&NudgeDb) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db.lock().map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For CLI commands and tests,
    /// never from a request path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, NudgeDb>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

/// A row of the local scheduler's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub id: i64,
    pub callback: CallbackKind,
    pub run_at: i64,
    /// JSON-encoded `TaskPayload`.
    pub payload: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Dead,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Dead => "dead",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "dead" => Ok(TaskStatus::Dead),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

/// Completion flags a watch record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MentionFlag {
    Reminded,
    Escalated,
}

impl MentionFlag {
    fn column(&self) -> &'static str {
        match self {
            MentionFlag::Reminded => "reminded",
            MentionFlag::Escalated => "escalated",
        }
    }
}

pub struct NudgeDb {
    conn: Connection,
}

impl NudgeDb {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).context("Failed to open SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    #[cfg(test)]
    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .busy_timeout(std::time::Duration::from_secs(5))
            .context("Failed to set busy timeout")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS tenants (
                    team_id TEXT PRIMARY KEY,
                    manager_user_id TEXT,
                    credential_ref TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS mentions (
                    team_id TEXT NOT NULL,
                    channel_id TEXT NOT NULL,
                    message_ts TEXT NOT NULL,
                    user_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    reminded INTEGER NOT NULL DEFAULT 0,
                    escalated INTEGER NOT NULL DEFAULT 0,
                    PRIMARY KEY (team_id, channel_id, message_ts, user_id)
                );

                CREATE TABLE IF NOT EXISTS secrets (
                    name TEXT PRIMARY KEY,
                    value TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS scheduled_tasks (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    callback TEXT NOT NULL,
                    task_key TEXT NOT NULL,
                    run_at INTEGER NOT NULL,
                    payload TEXT NOT NULL,
                    attempts INTEGER NOT NULL DEFAULT 0,
                    last_error TEXT,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at INTEGER NOT NULL,
                    UNIQUE(callback, task_key)
                );

                CREATE INDEX IF NOT EXISTS idx_mentions_created ON mentions(created_at);
                CREATE INDEX IF NOT EXISTS idx_tasks_due ON scheduled_tasks(status, run_at);
                ",
            )
            .context("Failed to create tables")?;
        Ok(())
    }

    // ── Mentions ──────────────────────────────────────────────────────

    /// Insert a watch record. Returns false if the key already existed, in
    /// which case the stored record is left untouched.
    pub fn insert_mention(&self, record: &MentionRecord) -> Result<bool> {
        let k = &record.key;
        let inserted = self
            .conn
            .execute(
                "INSERT INTO mentions (team_id, channel_id, message_ts, user_id, created_at, reminded, escalated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(team_id, channel_id, message_ts, user_id) DO NOTHING",
                params![
                    k.team_id,
                    k.channel_id,
                    k.message_ts,
                    k.user_id,
                    record.created_at,
                    record.reminded,
                    record.escalated
                ],
            )
            .context("Failed to insert mention")?;
        Ok(inserted > 0)
    }

    pub fn get_mention(&self, key: &MentionKey) -> Result<Option<MentionRecord>> {
        self.conn
            .query_row(
                "SELECT team_id, channel_id, message_ts, user_id, created_at, reminded, escalated
                 FROM mentions
                 WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3 AND user_id = ?4",
                params![key.team_id, key.channel_id, key.message_ts, key.user_id],
                mention_from_row,
            )
            .optional()
            .context("Failed to query mention")
    }

    /// Set a flag to true. Returns false if no record has this key.
    pub fn set_mention_flag(&self, key: &MentionKey, flag: MentionFlag) -> Result<bool> {
        let sql = format!(
            "UPDATE mentions SET {} = 1
             WHERE team_id = ?1 AND channel_id = ?2 AND message_ts = ?3 AND user_id = ?4",
            flag.column()
        );
        let updated = self
            .conn
            .execute(
                &sql,
                params![key.team_id, key.channel_id, key.message_ts, key.user_id],
            )
            .with_context(|| format!("Failed to set {} flag", flag.column()))?;
        Ok(updated > 0)
    }

    /// Watch records, newest first, optionally for one team.
    pub fn list_mentions(&self, team_id: Option<&str>, limit: u32) -> Result<Vec<MentionRecord>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT team_id, channel_id, message_ts, user_id, created_at, reminded, escalated
                 FROM mentions
                 WHERE ?1 IS NULL OR team_id = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2",
            )
            .context("Failed to prepare list_mentions")?;
        let rows = stmt
            .query_map(params![team_id, limit], mention_from_row)
            .context("Failed to list mentions")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read mention row")
    }

    /// Delete watch records created before `cutoff` (epoch seconds).
    pub fn prune_mentions(&self, cutoff: i64) -> Result<usize> {
        self.conn
            .execute("DELETE FROM mentions WHERE created_at < ?1", params![cutoff])
            .context("Failed to prune mentions")
    }

    // ── Tenants ───────────────────────────────────────────────────────

    pub fn get_tenant(&self, team_id: &str) -> Result<Option<Tenant>> {
        self.conn
            .query_row(
                "SELECT team_id, manager_user_id, credential_ref, created_at
                 FROM tenants WHERE team_id = ?1",
                params![team_id],
                tenant_from_row,
            )
            .optional()
            .context("Failed to query tenant")
    }

    pub fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT team_id, manager_user_id, credential_ref, created_at
                 FROM tenants ORDER BY team_id",
            )
            .context("Failed to prepare list_tenants")?;
        let rows = stmt
            .query_map([], tenant_from_row)
            .context("Failed to list tenants")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read tenant row")
    }

    /// Returns false if the tenant does not exist.
    pub fn set_manager(&self, team_id: &str, manager_user_id: Option<&str>) -> Result<bool> {
        let updated = self
            .conn
            .execute(
                "UPDATE tenants SET manager_user_id = ?2 WHERE team_id = ?1",
                params![team_id, manager_user_id],
            )
            .context("Failed to update manager")?;
        Ok(updated > 0)
    }

    /// Create the tenant or replace its credential reference. Creation time and
    /// manager of an existing tenant are kept.
    pub fn upsert_credential_ref(&self, team_id: &str, credential_ref: &str, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO tenants (team_id, manager_user_id, credential_ref, created_at)
                 VALUES (?1, NULL, ?2, ?3)
                 ON CONFLICT(team_id) DO UPDATE SET credential_ref = excluded.credential_ref",
                params![team_id, credential_ref, now],
            )
            .context("Failed to upsert tenant")?;
        Ok(())
    }

    // ── Secrets ───────────────────────────────────────────────────────

    pub fn get_secret(&self, name: &str) -> Result<Option<String>> {
        self.conn
            .query_row(
                "SELECT value FROM secrets WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query secret")
    }

    pub fn put_secret(&self, name: &str, value: &str, now: i64) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO secrets (name, value, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)
                 ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![name, value, now],
            )
            .context("Failed to upsert secret")?;
        Ok(())
    }

    // ── Scheduled tasks ───────────────────────────────────────────────

    /// Queue a callback. A task with the same `(callback, task_key)` that is
    /// still queued wins; returns false in that case.
    pub fn enqueue_task(
        &self,
        callback: CallbackKind,
        task_key: &str,
        run_at: i64,
        payload: &str,
        now: i64,
    ) -> Result<bool> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO scheduled_tasks (callback, task_key, run_at, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(callback, task_key) DO NOTHING",
                params![callback.as_str(), task_key, run_at, payload, now],
            )
            .context("Failed to enqueue task")?;
        Ok(inserted > 0)
    }

    /// Claim up to `limit` due tasks: each has its attempt counter bumped and
    /// is hidden until `now + lease_secs`, so a crashed worker's tasks come
    /// back on their own.
    pub fn lease_due_tasks(&self, now: i64, limit: u32, lease_secs: i64) -> Result<Vec<ScheduledTask>> {
        let tx = self
            .conn
            .unchecked_transaction()
            .context("Failed to begin lease transaction")?;
        let tasks = {
            let mut stmt = tx
                .prepare(
                    "SELECT id, callback, run_at, payload, attempts, last_error, status
                     FROM scheduled_tasks
                     WHERE status = 'pending' AND run_at <= ?1
                     ORDER BY run_at, id
                     LIMIT ?2",
                )
                .context("Failed to prepare lease query")?;
            let rows = stmt
                .query_map(params![now, limit], task_from_row)
                .context("Failed to query due tasks")?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to read task row")?
        };
        for task in &tasks {
            tx.execute(
                "UPDATE scheduled_tasks SET attempts = attempts + 1, run_at = ?2 WHERE id = ?1",
                params![task.id, now + lease_secs],
            )
            .context("Failed to lease task")?;
        }
        tx.commit().context("Failed to commit lease")?;

        Ok(tasks
            .into_iter()
            .map(|t| ScheduledTask {
                attempts: t.attempts + 1,
                ..t
            })
            .collect())
    }

    pub fn complete_task(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM scheduled_tasks WHERE id = ?1", params![id])
            .context("Failed to delete task")?;
        Ok(())
    }

    pub fn retry_task(&self, id: i64, run_at: i64, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE scheduled_tasks SET run_at = ?2, last_error = ?3 WHERE id = ?1",
                params![id, run_at, error],
            )
            .context("Failed to reschedule task")?;
        Ok(())
    }

    pub fn kill_task(&self, id: i64, error: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE scheduled_tasks SET status = 'dead', last_error = ?2 WHERE id = ?1",
                params![id, error],
            )
            .context("Failed to mark task dead")?;
        Ok(())
    }

    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Result<Vec<ScheduledTask>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT id, callback, run_at, payload, attempts, last_error, status
                 FROM scheduled_tasks
                 WHERE ?1 IS NULL OR status = ?1
                 ORDER BY run_at, id",
            )
            .context("Failed to prepare list_tasks")?;
        let rows = stmt
            .query_map(params![status.map(|s| s.as_str())], task_from_row)
            .context("Failed to list tasks")?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .context("Failed to read task row")
    }
}

// ── Internal row helpers ──────────────────────────────────────────────

fn mention_from_row(row: &Row<'_>) -> rusqlite::Result<MentionRecord> {
    Ok(MentionRecord {
        key: MentionKey {
            team_id: row.get(0)?,
            channel_id: row.get(1)?,
            message_ts: row.get(2)?,
            user_id: row.get(3)?,
        },
        created_at: row.get(4)?,
        reminded: row.get(5)?,
        escalated: row.get(6)?,
    })
}

fn tenant_from_row(row: &Row<'_>) -> rusqlite::Result<Tenant> {
    Ok(Tenant {
        team_id: row.get(0)?,
        manager_user_id: row.get(1)?,
        credential_ref: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduledTask> {
    let callback: String = row.get(1)?;
    let status: String = row.get(6)?;
    Ok(ScheduledTask {
        id: row.get(0)?,
        callback: callback.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?,
        run_at: row.get(2)?,
        payload: row.get(3)?,
        attempts: row.get(4)?,
        last_error: row.get(5)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, e.into())
        })?,
    })
}
