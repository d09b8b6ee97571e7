//! WebSocket route for topic watches.

use axum::{
    extract::{State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};

use crate::auth::StoreAccess;
use crate::handlers::handle_watch_connection;
use crate::AppState;

/// Create watch routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/watch", get(watch_handler))
}

/// GET /v1/watch - Upgrade to a multiplexed watch socket.
async fn watch_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    access: StoreAccess,
) -> Response {
    let store = state.store.clone();
    let conn_manager = state.conn_manager.clone();
    ws.on_upgrade(move |socket| {
        handle_watch_connection(socket, store, conn_manager, access.label().to_string())
    })
}
