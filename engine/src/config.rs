//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of the sync core.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Maximum absolute price difference for two stock rows to be merged
    pub price_tolerance: f64,
    /// Read-back attempts after a create before giving up
    pub verify_attempts: u32,
    /// Delay before the first retried read-back; doubles on every retry
    pub verify_backoff: Duration,
    /// Capacity of the event broadcast channel
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            price_tolerance: 0.01,
            verify_attempts: 3,
            verify_backoff: Duration::from_millis(100),
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn with_price_tolerance(mut self, tolerance: f64) -> Self {
        self.price_tolerance = tolerance;
        self
    }

    pub fn with_verification(mut self, attempts: u32, backoff: Duration) -> Self {
        self.verify_attempts = attempts.max(1);
        self.verify_backoff = backoff;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Delay before retry `attempt` (0-based) of a read-back.
    pub fn verify_delay(&self, attempt: u32) -> Duration {
        self.verify_backoff.saturating_mul(1u32 << attempt.min(16))
    }
}

/// Connection details of the hosted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Payload of `GET /api/config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConfig {
    pub store: StoreEndpoint,
    /// Present only when the server exposes it for the offline login path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub admin_code: Option<String>,
}
