//! testdash -- run browser end-to-end suites and watch them live.
//!
//! This crate provides the core library for spawning a project's test
//! runner, turning its console stream into live progress, summarizing the
//! final report, and keeping a short per-project run history.

pub mod api;
pub mod config;
pub mod live;
pub mod orchestrator;
pub mod progress;
pub mod projects;
pub mod runner;
pub mod storage;
pub mod summary;

use anyhow::{Context, Result};

use crate::config::DashboardConfig;

/// Start the testdash daemon: API server, live channel, and run queue.
pub async fn serve(config: DashboardConfig) -> Result<()> {
    // 1. Storage, broadcaster, orchestrator, queue worker
    tracing::info!(db_path = %config.storage.db_path.display(), "Initializing database");
    let state = api::state::AppState::build(&config)?;
    tracing::info!(root = %state.catalog.root().display(), "Serving projects");

    // 2. Start API Server
    let addr: std::net::SocketAddr = config
        .server
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address: {}", config.server.listen_address))?;
    let app = api::router(state);

    tracing::info!(%addr, "testdash listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
