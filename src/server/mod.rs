//! HTTP surface: Slack webhooks, scheduler callbacks and health.

pub mod api;
pub mod slack;

use std::future::Future;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use api::{ApiError, AppState, SharedState};

/// Build the full application router.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `0.0.0.0:{port}` until `shutdown` resolves.
pub async fn serve<F>(state: SharedState, port: u16, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, "nudge listening");

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")?;

    tracing::info!("Server shut down gracefully");
    Ok(())
}
