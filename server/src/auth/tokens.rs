//! Short-lived admin tokens issued by `/api/admin/verify`.

use dashmap::DashMap;

/// Milliseconds since the Unix epoch, per the server clock.
pub fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}

/// Issued admin tokens and their expiry.
#[derive(Debug)]
pub struct AdminTokens {
    tokens: DashMap<String, u64>,
    ttl_ms: u64,
}

impl AdminTokens {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            tokens: DashMap::new(),
            ttl_ms,
        }
    }

    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Issue a fresh token valid for the configured lifetime from `now`.
    pub fn issue(&self, now: u64) -> String {
        self.prune(now);
        let token = uuid::Uuid::new_v4().simple().to_string();
        self.tokens
            .insert(token.clone(), now.saturating_add(self.ttl_ms));
        tracing::debug!(active = self.tokens.len(), "admin token issued");
        token
    }

    pub fn is_valid(&self, token: &str, now: u64) -> bool {
        match self.tokens.get(token).map(|expiry| *expiry) {
            Some(expiry) if now < expiry => true,
            Some(_) => {
                self.tokens.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(token).is_some()
    }

    /// Drop every expired token.
    pub fn prune(&self, now: u64) {
        self.tokens.retain(|_, expiry| now < *expiry);
    }

    pub fn active_count(&self) -> usize {
        self.tokens.len()
    }
}
