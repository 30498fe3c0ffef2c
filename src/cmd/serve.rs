//! Service entry point: `nudge serve`.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;

use nudge::config::{NudgeConfig, SchedulerBackend};
use nudge::reminder::{LifecyclePorts, MentionLifecycle};
use nudge::scheduler::{TaskWorker, WorkerConfig, build_scheduler};
use nudge::server::{self, AppState};
use nudge::slack::{CredentialCache, CredentialProvider, SlackClient};
use nudge::store::{DbHandle, SqliteStore};

pub async fn cmd_serve(config_path: &Path, port: Option<u16>) -> Result<()> {
    let mut config = NudgeConfig::resolve(config_path)?;
    if let Some(port) = port {
        config.server.port = port;
    }
    let _log_guard = nudge::telemetry::init(&config.logging)?;

    config.ensure_valid()?;
    for warning in config.warnings() {
        tracing::warn!("{}", warning);
    }

    let db = DbHandle::open(&config.store.db_path).with_context(|| {
        format!("Failed to open database {}", config.store.db_path.display())
    })?;
    let store = SqliteStore::new(db.clone());

    let credentials = CredentialProvider::new(
        Arc::new(CredentialCache::new()),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
    );
    let slack = SlackClient::new(
        config.slack.api_base.clone(),
        credentials,
        config.slack.reply_page_limit,
    )?;

    let ports = LifecyclePorts {
        mentions: Arc::new(store.clone()),
        tenants: Arc::new(store.clone()),
        replies: Arc::new(slack.clone()),
        notifier: Arc::new(slack.clone()),
        scheduler: build_scheduler(&config, &db)?,
    };
    let lifecycle = Arc::new(MentionLifecycle::new(ports, config.lifecycle_config()?)?);

    tracing::info!(
        backend = %config.scheduler.backend,
        remind_after = %config.windows.remind_after,
        escalate_after = %config.windows.escalate_after,
        db = %config.store.db_path.display(),
        "Starting nudge"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = match config.scheduler.backend {
        SchedulerBackend::Local => {
            let worker = TaskWorker::new(
                db.clone(),
                lifecycle.clone(),
                WorkerConfig::from_config(&config)?,
            );
            Some(tokio::spawn(worker.run(shutdown_rx)))
        }
        SchedulerBackend::CloudTasks => None,
    };

    let port = config.server.port;
    let state = Arc::new(AppState {
        lifecycle,
        tenants: Arc::new(store.clone()),
        secrets: Arc::new(store),
        slack,
        config,
    });
    let served = server::serve(state, port, shutdown_signal()).await;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker {
        handle.await.context("Task worker panicked")?;
    }
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("Shutting down");
}
