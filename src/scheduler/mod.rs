//! Delayed callback delivery.
//!
//! `local` keeps tasks in SQLite and drains them with an in-process worker;
//! `cloud_tasks` hands them to Google Cloud Tasks, which calls back over HTTP.

pub mod cloud_tasks;
pub mod local;

use std::sync::Arc;

use anyhow::Result;
use nudge_common::SchedulerPort;

use crate::config::{NudgeConfig, SchedulerBackend};
use crate::store::DbHandle;

pub use cloud_tasks::{CloudTasksConfig, CloudTasksScheduler};
pub use local::{LocalScheduler, TaskWorker, TickStats, WorkerConfig};

/// Build the scheduler selected by `scheduler.backend`.
pub fn build_scheduler(config: &NudgeConfig, db: &DbHandle) -> Result<Arc<dyn SchedulerPort>> {
    match config.scheduler.backend {
        SchedulerBackend::Local => Ok(Arc::new(LocalScheduler::new(db.clone()))),
        SchedulerBackend::CloudTasks => {
            let cloud = CloudTasksConfig::from_config(config)?;
            Ok(Arc::new(CloudTasksScheduler::new(cloud)?))
        }
    }
}

impl WorkerConfig {
    pub fn from_config(config: &NudgeConfig) -> Result<Self> {
        Ok(Self {
            poll_interval: config.poll_interval()?,
            max_attempts: config.scheduler.max_attempts,
            ..Self::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_config_from_config() {
        let mut config = NudgeConfig::default();
        config.scheduler.poll_interval = "2s".into();
        config.scheduler.max_attempts = 3;
        let worker = WorkerConfig::from_config(&config).unwrap();
        assert_eq!(worker.poll_interval, std::time::Duration::from_secs(2));
        assert_eq!(worker.max_attempts, 3);
    }

    #[test]
    fn test_build_scheduler_cloud_tasks_needs_project() {
        let db = DbHandle::in_memory().unwrap();
        let mut config = NudgeConfig::default();
        assert!(build_scheduler(&config, &db).is_ok());

        config.scheduler.backend = SchedulerBackend::CloudTasks;
        assert!(build_scheduler(&config, &db).is_err());
    }
}
