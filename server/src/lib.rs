//! Armory Server - config, admin auth and document store for the storefront.
//!
//! Serves `/api/config` and `/api/admin/verify` for the client's auth
//! boundary, plus the `/v1` document API and `/v1/watch` socket consumed by
//! `armory_engine::RemoteBackend`. Documents live in PostgreSQL when a
//! database is configured and in an in-process `MemoryBackend` otherwise.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod websocket;

use std::sync::Arc;

use armory_engine::StorageBackend;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AdminTokens;
use crate::config::Config;
use crate::websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StorageBackend>,
    pub config: Arc<Config>,
    pub conn_manager: Arc<ConnectionManager>,
    pub admin_tokens: Arc<AdminTokens>,
}

impl AppState {
    pub fn new(store: Arc<dyn StorageBackend>, config: Config) -> Self {
        let admin_tokens = Arc::new(AdminTokens::new(config.admin_token_ttl_ms));
        Self {
            store,
            config: Arc::new(config),
            conn_manager: ConnectionManager::new_shared(),
            admin_tokens,
        }
    }
}

/// Build the application router with tracing and CORS layers.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
