//! Persisted admin session state.
//!
//! The session survives restarts as a small JSON blob. A server-issued token
//! carries an expiry; a session opened through the offline fallback has no
//! token and stays open until logout.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::Timestamp;

/// Outcome of [`AdminSession::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    /// Valid server-issued token
    Active,
    /// Logged in without a token
    Basic,
    /// The token expired and the session was cleared
    Expired,
    LoggedOut,
}

impl SessionStatus {
    pub fn is_logged_in(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Basic)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminSession {
    pub logged_in: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Milliseconds since epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
}

impl AdminSession {
    /// Session backed by a server-issued token.
    pub fn with_token(token: impl Into<String>, expires_at: Timestamp) -> Self {
        Self {
            logged_in: true,
            token: Some(token.into()),
            expires_at: Some(expires_at),
        }
    }

    /// Session opened without a token.
    pub fn basic() -> Self {
        Self {
            logged_in: true,
            token: None,
            expires_at: None,
        }
    }

    /// Evaluate the session at `now`, clearing it if the token expired.
    pub fn check(&mut self, now: Timestamp) -> SessionStatus {
        if !self.logged_in {
            return SessionStatus::LoggedOut;
        }
        match (self.token.is_some(), self.expires_at) {
            (true, Some(expiry)) if now < expiry => SessionStatus::Active,
            (_, Some(expiry)) if now >= expiry => {
                self.clear();
                SessionStatus::Expired
            }
            _ => SessionStatus::Basic,
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Milliseconds left on the token, if any.
    pub fn remaining(&self, now: Timestamp) -> Option<u64> {
        self.expires_at.map(|expiry| expiry.saturating_sub(now))
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::Protocol(e.to_string()))
    }

    /// Restore from storage. Unreadable state counts as logged out.
    pub fn from_json(json: &str) -> Self {
        serde_json::from_str(json).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "discarding unreadable admin session");
            Self::default()
        })
    }
}
