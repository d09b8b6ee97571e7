//! Bearer token extraction for the store API.
//!
//! With `STORE_TOKEN` unset the store is open. Otherwise a request must
//! carry either the store token or a live admin token.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
};

use super::tokens::now_ms;
use crate::AppState;

/// Caller allowed to use the store API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAccess {
    /// No store token is configured
    Anonymous,
    /// Presented the store token
    Client,
    /// Presented an admin token from `/api/admin/verify`
    Admin,
}

impl StoreAccess {
    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            StoreAccess::Anonymous => "anonymous",
            StoreAccess::Client => "client",
            StoreAccess::Admin => "admin",
        }
    }
}

impl FromRequestParts<AppState> for StoreAccess {
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let Some(expected) = state.config.store_token.as_deref() else {
            return Ok(StoreAccess::Anonymous);
        };

        match auth_header {
            Some(header) if header.starts_with("Bearer ") => {
                let token = header.trim_start_matches("Bearer ").trim();
                if token.is_empty() {
                    return Err((StatusCode::UNAUTHORIZED, "Empty bearer token"));
                }
                if token == expected {
                    Ok(StoreAccess::Client)
                } else if state.admin_tokens.is_valid(token, now_ms()) {
                    Ok(StoreAccess::Admin)
                } else {
                    Err((StatusCode::UNAUTHORIZED, "Invalid store token"))
                }
            }
            Some(_) => Err((
                StatusCode::UNAUTHORIZED,
                "Invalid authorization header format",
            )),
            None => Err((StatusCode::UNAUTHORIZED, "Missing authorization header")),
        }
    }
}
