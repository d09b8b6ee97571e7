//! Client bootstrap and admin verification.

use armory_engine::auth::{VerifyRequest, VerifyResponse};
use armory_engine::RemoteConfig;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::auth::now_ms;
use crate::error::{AppError, Result};
use crate::AppState;

/// Create auth API routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/config", get(config_handler))
        .route("/api/admin/verify", post(verify_handler))
}

/// GET /api/config - Store connection details for clients.
async fn config_handler(State(state): State<AppState>) -> Json<RemoteConfig> {
    Json(state.config.remote_config())
}

/// POST /api/admin/verify - Exchange the admin code for a token.
async fn verify_handler(
    State(state): State<AppState>,
    Json(request): Json<VerifyRequest>,
) -> Result<(StatusCode, Json<VerifyResponse>)> {
    let expected = state
        .config
        .admin_code
        .as_deref()
        .ok_or_else(|| AppError::Internal("ADMIN_CODE is not configured".to_string()))?;

    let code = request.code.trim();
    if code.is_empty() || code != expected {
        tracing::warn!("admin verification refused");
        return Ok((
            StatusCode::UNAUTHORIZED,
            Json(VerifyResponse::denied("Invalid admin code")),
        ));
    }

    let token = state.admin_tokens.issue(now_ms());
    tracing::info!("admin verified, token issued");
    Ok((
        StatusCode::OK,
        Json(VerifyResponse::granted(token, state.admin_tokens.ttl_ms())),
    ))
}
