//! REST API server for Huddle.
//!
//! Provides HTTP endpoints for:
//! - Provider webhooks (lifecycle events, chat messages)
//! - On-demand agent connection
//! - Meeting management (create, list, cancel, mark-ended, regenerate)
//! - Agent personas and user identity sync

pub mod error;
pub mod routes;

use anyhow::Result;
use axum::{response::Json, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tracing::info;

use crate::db::Db;
use crate::jobs::JobQueue;
use crate::lifecycle::{ConnectLockRegistry, LifecycleReconciler};

/// Shared state for request handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub reconciler: Arc<LifecycleReconciler>,
    pub locks: ConnectLockRegistry,
    pub jobs: JobQueue,
    pub webhook_secret: Arc<str>,
}

pub struct ApiServer {
    port: u16,
    state: AppState,
}

impl ApiServer {
    pub fn new(port: u16, state: AppState) -> Self {
        Self { port, state }
    }

    /// Assemble the service router. Exposed separately so tests can drive
    /// the full HTTP surface without binding a socket.
    pub fn build_router(state: AppState) -> Router {
        Router::new()
            // Root and version endpoints
            .route("/", get(status))
            .route("/version", get(version))
            .merge(routes::webhook::router(state.clone()))
            .merge(routes::connect::router(state.clone()))
            .merge(routes::meetings::router(state.clone()))
            .merge(routes::agents::router(state.clone()))
            .merge(routes::users::router(state))
            .layer(ServiceBuilder::new())
    }

    pub async fn start(self) -> Result<()> {
        let app = Self::build_router(self.state);

        let listener = tokio::net::TcpListener::bind(&format!("127.0.0.1:{}", self.port)).await?;

        info!("API server listening on http://127.0.0.1:{}", self.port);
        info!("Endpoints:");
        info!("  POST /webhook                         - Provider lifecycle events (PUT accepted)");
        info!("  POST /connect-agent                   - Connect an AI agent to a live call");
        info!("  POST /meetings                        - Create a meeting");
        info!("  GET  /meetings                        - List meetings");
        info!("  GET  /meetings/:id                    - Get a meeting");
        info!("  POST /meetings/:id/cancel             - Cancel an upcoming meeting");
        info!("  POST /meetings/:id/regenerate-summary - Regenerate a summary");
        info!("  POST /meetings/mark-ended             - End-of-call fallback");
        info!("  POST /agents                          - Create an agent persona");
        info!("  GET  /agents                          - List agents");
        info!("  POST /users                           - Sync a user identity");

        axum::serve(listener, app).await?;

        Ok(())
    }
}

async fn status() -> Json<Value> {
    Json(json!({
        "service": "huddle",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

async fn version() -> Json<Value> {
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "name": "huddle"
    }))
}
