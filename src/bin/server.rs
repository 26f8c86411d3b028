//! Backend API Server
//!
//! Loads settings from the environment (and `.env`), builds the pool-backed
//! application state, and serves the HTTP API until ctrl-c.

use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};

use backend_api::config::Settings;
use backend_api::database::DatabaseConnection;
use backend_api::logging::init_structured_logging;
use backend_api::web::create_app;
use backend_api::web::state::AppState;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8000";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Arc::new(Settings::load().context("loading settings")?);
    init_structured_logging();

    info!(environment = %settings.environment, "🚀 Application starting up");

    let database =
        DatabaseConnection::from_settings(&settings).context("configuring database pool")?;
    let state = AppState::new(Arc::clone(&settings), database.clone());
    let app = create_app(state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.to_string());
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("binding {bind_addr}"))?;

    info!(bind_addr = %bind_addr, "✅ Application startup complete");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    info!("🛑 Application shutting down");
    database.close().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
}
