//! Configuration management for the server.

use std::env;

use armory_engine::{RemoteConfig, StoreEndpoint};

/// Default admin token lifetime: one hour.
pub const DEFAULT_ADMIN_TOKEN_TTL_MS: u64 = 3_600_000;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// PostgreSQL connection URL; documents stay in memory without one
    pub database_url: Option<String>,
    /// Pool size when a database is configured
    pub max_connections: u32,
    /// Code checked by `/api/admin/verify`
    pub admin_code: Option<String>,
    /// Bearer token required by the store API, handed out by `/api/config`
    pub store_token: Option<String>,
    /// Store URL advertised to clients
    pub public_store_url: Option<String>,
    pub admin_token_ttl_ms: u64,
    /// Include the admin code in `/api/config` for offline logins
    pub expose_admin_code: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            database_url: None,
            max_connections: 10,
            admin_code: None,
            store_token: None,
            public_store_url: None,
            admin_token_ttl_ms: DEFAULT_ADMIN_TOKEN_TTL_MS,
            expose_admin_code: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = env::var("HOST").unwrap_or(defaults.host);

        let port = match env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidPort)?,
            Err(_) => defaults.port,
        };

        let max_connections = match env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("DATABASE_MAX_CONNECTIONS"))?,
            Err(_) => defaults.max_connections,
        };

        let admin_token_ttl_ms = match env::var("ADMIN_TOKEN_TTL_MS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("ADMIN_TOKEN_TTL_MS"))?,
            Err(_) => defaults.admin_token_ttl_ms,
        };

        let expose_admin_code = match env::var("EXPOSE_ADMIN_CODE") {
            Ok(raw) => parse_flag(&raw).ok_or(ConfigError::InvalidFlag("EXPOSE_ADMIN_CODE"))?,
            Err(_) => false,
        };

        Ok(Self {
            host,
            port,
            database_url: non_empty("DATABASE_URL"),
            max_connections,
            admin_code: non_empty("ADMIN_CODE"),
            store_token: non_empty("STORE_TOKEN"),
            public_store_url: non_empty("PUBLIC_STORE_URL"),
            admin_token_ttl_ms,
            expose_admin_code,
        })
    }

    /// URL clients should use for the store API.
    pub fn store_url(&self) -> String {
        if let Some(url) = &self.public_store_url {
            return url.trim_end_matches('/').to_string();
        }
        let host = match self.host.as_str() {
            "0.0.0.0" | "::" => "localhost",
            other => other,
        };
        format!("http://{}:{}", host, self.port)
    }

    /// Payload served by `GET /api/config`.
    pub fn remote_config(&self) -> RemoteConfig {
        RemoteConfig {
            store: StoreEndpoint {
                url: self.store_url(),
                token: self.store_token.clone(),
            },
            admin_code: if self.expose_admin_code {
                self.admin_code.clone()
            } else {
                None
            },
        }
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "" | "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("{0} must be a non-negative integer")]
    InvalidNumber(&'static str),

    #[error("{0} must be true or false")]
    InvalidFlag(&'static str),
}
