//! Error types for the Armory engine.

use crate::{DocumentId, Topic};
use thiserror::Error;

/// All possible errors from the Armory engine.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    // Store errors
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    // Input errors
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("write not confirmed by read-back: {0}")]
    VerificationFailed(String),

    // Business rule errors
    #[error("stock exhausted for item {0}")]
    StockExhausted(DocumentId),

    #[error("invalid transition for request {id}: already {status}")]
    InvalidTransition { id: DocumentId, status: String },

    #[error("purchase requests are disabled")]
    SalesDisabled,

    // Auth boundary
    #[error("admin authentication denied: {0}")]
    AuthDenied(String),

    // Lifecycle
    #[error("subscriptions torn down, cannot subscribe to {0}")]
    ShutDown(Topic),

    #[error("protocol error: {0}")]
    Protocol(String),

    // Persistence
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

impl Error {
    /// Whether retrying the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Unreachable(_))
    }

    /// Whether the condition blocks the session until an operator fixes it.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Error::PermissionDenied(_))
    }

    pub(crate) fn not_found(topic: Topic, id: &str) -> Self {
        Error::NotFound(format!("{}/{}", topic, id))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
