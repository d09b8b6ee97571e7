//! Armory Server binary.

use std::sync::Arc;

use armory_engine::{MemoryBackend, StorageBackend};
use armory_server::config::Config;
use armory_server::db::{self, PgDocumentStore};
use armory_server::{build_router, AppState};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "armory_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!("Starting Armory Server on {}:{}", config.host, config.port);
    if config.admin_code.is_none() {
        tracing::warn!("ADMIN_CODE is not set, admin verification will fail");
    }

    let store: Arc<dyn StorageBackend> = match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.max_connections).await?;

            tracing::info!("Running database migrations...");
            db::run_migrations(&pool).await?;

            Arc::new(PgDocumentStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set, documents are kept in memory");
            MemoryBackend::shared()
        }
    };

    let addr = format!("{}:{}", config.host, config.port);
    let app = build_router(AppState::new(store, config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
