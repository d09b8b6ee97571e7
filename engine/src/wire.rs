//! Watch channel protocol between the store server and remote clients.
//!
//! All messages are JSON-encoded, tagged by `type`, and use snake_case for
//! field names. One socket carries watches for any number of topics.

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::record::Document;
use crate::{DocumentId, Topic};

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open a watch on a topic.
    Subscribe {
        topic: Topic,
        /// Echoed in `subscribed` so the client can pair the watch id
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Close a watch.
    Unsubscribe { watch_id: String },

    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A watch was opened. Always precedes its first snapshot.
    Subscribed {
        watch_id: String,
        topic: Topic,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },

    /// Full current contents of a watched topic.
    Snapshot {
        watch_id: String,
        topic: Topic,
        documents: Vec<Document>,
    },

    /// A watch failed and was closed by the server.
    WatchError { watch_id: String, error: WireError },

    /// Response to ping.
    Pong,

    /// Error not tied to a watch (malformed message, failed subscribe).
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl ServerMessage {
    /// Create an error message.
    pub fn error(message: impl Into<String>, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
            request_id,
            code: None,
        }
    }

    /// Create an error message carrying an engine error.
    pub fn from_engine_error(error: &Error, request_id: Option<String>) -> Self {
        ServerMessage::Error {
            message: error.to_string(),
            request_id,
            code: Some(ErrorCode::from(error)),
        }
    }
}

/// Coarse error class carried over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Unreachable,
    PermissionDenied,
    NotFound,
    ValidationFailed,
    Internal,
}

impl From<&Error> for ErrorCode {
    fn from(error: &Error) -> Self {
        match error {
            Error::Unreachable(_) => ErrorCode::Unreachable,
            Error::PermissionDenied(_) | Error::AuthDenied(_) => ErrorCode::PermissionDenied,
            Error::NotFound(_) => ErrorCode::NotFound,
            Error::ValidationFailed(_) => ErrorCode::ValidationFailed,
            _ => ErrorCode::Internal,
        }
    }
}

/// Error payload of a `watch_error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl From<&Error> for WireError {
    fn from(error: &Error) -> Self {
        Self {
            code: error.into(),
            message: error.to_string(),
        }
    }
}

impl From<WireError> for Error {
    fn from(wire: WireError) -> Self {
        match wire.code {
            ErrorCode::Unreachable | ErrorCode::Internal => Error::Unreachable(wire.message),
            ErrorCode::PermissionDenied => Error::PermissionDenied(wire.message),
            ErrorCode::NotFound => Error::NotFound(wire.message),
            ErrorCode::ValidationFailed => Error::ValidationFailed(wire.message),
        }
    }
}

/// Body of `POST /v1/{topic}` responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertResponse {
    pub id: DocumentId,
}

/// Body of `POST /v1/{topic}/{id}/increment`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementRequest {
    pub field: String,
    pub delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementResponse {
    pub value: f64,
}

/// Body of `POST /v1/{topic}/batch-delete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDeleteRequest {
    pub ids: Vec<DocumentId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchDeleteResponse {
    pub deleted: usize,
}

/// JSON error body returned by the store and auth endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorBody {
    /// Best-effort message from a raw response body.
    pub fn message_from(raw: &str) -> String {
        match serde_json::from_str::<ErrorBody>(raw) {
            Ok(body) => match body.details {
                Some(details) => format!("{}: {}", body.error, details),
                None => body.error,
            },
            Err(_) => raw.trim().to_string(),
        }
    }
}
