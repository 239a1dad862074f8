//! HTTP surface: webhook ingestion, chat events, the dashboard query API and
//! health.

mod handlers;
pub mod signing;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::engine::LifecycleEngine;

/// Server state shared across handlers.
pub struct AppState {
    pub engine: Arc<LifecycleEngine>,
    /// Slack signing secret. Verification is skipped when unset.
    pub signing_secret: Option<String>,
}

impl AppState {
    #[must_use]
    pub fn new(engine: Arc<LifecycleEngine>, signing_secret: Option<String>) -> Self {
        Self {
            engine,
            signing_secret,
        }
    }
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/webhook/alert", post(handlers::ingest_alerts))
        .route("/slack/events", post(handlers::slack_events))
        .route("/api/alerts", get(handlers::list_alerts))
        .route("/api/alerts/{alert_id}", get(handlers::get_alert))
        .route("/api/alerts/{alert_id}/status", put(handlers::update_status))
        .route("/api/alerts/{alert_id}/ticket", post(handlers::create_ticket))
        .route("/api/stats", get(handlers::stats))
        .route(
            "/api/metrics",
            get(handlers::list_metrics).post(handlers::record_metrics),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
///
/// # Errors
///
/// Returns an error if the server fails to bind or serve.
pub async fn run_server(state: Arc<AppState>, addr: &str) -> Result<()> {
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Alert lifecycle server listening on {addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
