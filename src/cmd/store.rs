//! Database commands: `nudge init-db`, `mentions`, `tasks`, `prune`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nudge::config::{NudgeConfig, format_duration, parse_duration};
use nudge::store::{DbHandle, SqliteStore, TaskStatus};

use super::tenant::format_epoch;

fn open_db(config: &NudgeConfig) -> Result<DbHandle> {
    DbHandle::open(&config.store.db_path)
        .with_context(|| format!("Failed to open database {}", config.store.db_path.display()))
}

pub fn cmd_init_db(config_path: &Path, db_path: Option<PathBuf>) -> Result<()> {
    let mut config = NudgeConfig::resolve(config_path)?;
    if let Some(path) = db_path {
        config.store.db_path = path;
    }
    open_db(&config)?;
    println!("Database initialized at {}", config.store.db_path.display());
    Ok(())
}

pub async fn cmd_mentions(config_path: &Path, team: Option<String>, limit: u32) -> Result<()> {
    let config = NudgeConfig::resolve(config_path)?;
    let store = SqliteStore::new(open_db(&config)?);

    let records = store.list_mentions(team, limit).await?;
    if records.is_empty() {
        println!("No watched mentions.");
        return Ok(());
    }
    println!("{:<10} {:<26} KEY", "STATE", "CREATED");
    for record in records {
        println!(
            "{:<10} {:<26} {}",
            record.state().as_str(),
            format_epoch(record.created_at),
            record.key
        );
    }
    Ok(())
}

pub async fn cmd_tasks(config_path: &Path, dead: bool) -> Result<()> {
    let config = NudgeConfig::resolve(config_path)?;
    let db = open_db(&config)?;

    let status = if dead { TaskStatus::Dead } else { TaskStatus::Pending };
    let tasks = db.call(move |db| db.list_tasks(Some(status))).await?;
    if tasks.is_empty() {
        println!("No {} tasks.", status.as_str());
        return Ok(());
    }
    for task in tasks {
        println!(
            "#{:<6} {:<9} run_at={} attempts={}{}",
            task.id,
            task.callback.as_str(),
            format_epoch(task.run_at),
            task.attempts,
            task.last_error
                .map(|e| format!(" last_error={}", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn cmd_prune(config_path: &Path, older_than: &str) -> Result<()> {
    let age = parse_duration(older_than)
        .map_err(|e| anyhow::anyhow!("Invalid --older-than '{}': {}", older_than, e))?;
    let config = NudgeConfig::resolve(config_path)?;
    let store = SqliteStore::new(open_db(&config)?);

    let cutoff = chrono::Utc::now().timestamp() - age.num_seconds();
    let removed = store.prune_mentions(cutoff).await?;
    println!(
        "Removed {} watch record(s) older than {}",
        removed,
        format_duration(age)
    );
    Ok(())
}
