//! Liveness endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub version: &'static str,
    /// `postgres` or `memory`
    pub store: &'static str,
    pub watch_connections: usize,
    pub open_watches: usize,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(banner))
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: chrono::Utc::now().to_rfc3339(),
        version: env!("CARGO_PKG_VERSION"),
        store: if state.config.database_url.is_some() {
            "postgres"
        } else {
            "memory"
        },
        watch_connections: state.conn_manager.connection_count(),
        open_watches: state.conn_manager.watch_count(),
    })
}

async fn banner() -> &'static str {
    "Armory Store Server"
}
