//! Unified error handling for the server.

use armory_engine::wire::ErrorBody;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Engine error: {0}")]
    Engine(#[from] armory_engine::Error),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    fn engine_status(error: &armory_engine::Error) -> StatusCode {
        use armory_engine::Error;

        match error {
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::ValidationFailed(_) | Error::Protocol(_) | Error::InvalidSnapshot(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
            Error::AuthDenied(_) => StatusCode::UNAUTHORIZED,
            Error::Unreachable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::StockExhausted(_) | Error::InvalidTransition { .. } | Error::SalesDisabled => {
                StatusCode::CONFLICT
            }
            Error::VerificationFailed(_) | Error::ShutDown(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, details) = match &self {
            AppError::Database(e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database error".to_string(),
                    None,
                )
            }
            AppError::Engine(e) => {
                let status = Self::engine_status(e);
                if status.is_server_error() {
                    tracing::error!("Engine error: {:?}", e);
                } else {
                    tracing::debug!("Engine error: {:?}", e);
                }
                (status, e.to_string(), None)
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string(), None),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                    Some(msg.clone()),
                )
            }
        };

        let body = Json(ErrorBody {
            error: error_message,
            details,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
