//! HTTP route definitions.

mod api;
mod health;
mod store;
mod watch;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(api::routes())
        .merge(store::routes())
        .merge(watch::routes())
}
