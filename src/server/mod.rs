//! HTTP server wiring: configuration, router construction, startup.

pub mod api;
pub mod models;
pub mod sse;
pub mod ws;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;

use self::api::{AppState, SharedState};
use crate::broadcast::Broadcaster;
use crate::job::JobController;

/// Configuration for the rigger server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Directory the start endpoint resolves playbook names against.
    pub playbook_dir: PathBuf,
    /// Binary used to execute playbooks.
    pub interpreter: String,
    /// Permissive CORS for the SPA dev server.
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            playbook_dir: PathBuf::from("/opt/rigger/playbooks"),
            interpreter: "ansible-playbook".to_string(),
            dev_mode: false,
        }
    }
}

/// Build the full application router: REST API, SSE replay stream, and the
/// WebSocket push stream.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/ws/output", get(ws::ws_handler))
        .with_state(state)
}

/// Start the server and serve until interrupted.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let broadcaster = Broadcaster::new();
    let controller = JobController::new(Arc::clone(&broadcaster));
    let state = Arc::new(AppState {
        controller,
        broadcaster,
        config,
    });

    let mut app = build_router(Arc::clone(&state));
    if state.config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    tracing::info!(addr = %listener.local_addr()?, "rigger listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    tracing::info!("shutdown signal received");
}
