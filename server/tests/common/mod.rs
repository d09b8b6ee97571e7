//! Shared fixtures for the server integration tests.
//!
//! Every test runs its own server on an ephemeral port, backed by an
//! in-memory store, and talks to it over real HTTP and WebSocket.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use armory_engine::MemoryBackend;
use armory_server::config::Config;
use armory_server::{build_router, AppState};

pub const ADMIN_CODE: &str = "4242";
pub const STORE_TOKEN: &str = "s3cret";

pub struct TestServer {
    pub base_url: String,
    pub store: Arc<MemoryBackend>,
    pub state: AppState,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn ws_url(&self) -> String {
        format!("{}/v1/watch", self.base_url.replacen("http://", "ws://", 1))
    }
}

/// Open store, known admin code.
pub fn open_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        admin_code: Some(ADMIN_CODE.to_string()),
        ..Config::default()
    }
}

/// Store API behind [`STORE_TOKEN`].
pub fn guarded_config() -> Config {
    Config {
        store_token: Some(STORE_TOKEN.to_string()),
        ..open_config()
    }
}

pub async fn spawn_server(mut config: Config) -> TestServer {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let base_url = format!("http://{}", addr);

    config.port = addr.port();
    config.public_store_url = Some(base_url.clone());

    let store = MemoryBackend::shared();
    let state = AppState::new(store.clone(), config);
    let app = build_router(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url,
        store,
        state,
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
