//! Patron customer service binary.
//!
//! Wires the store, event hub, and API server together and serves until
//! `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `patron-config.yaml` (defaults if absent)
//! 2. Initialize structured logging (tracing)
//! 3. Open the configured store (in-memory or `PostgreSQL` + migrations)
//! 4. Build the event hub, customer service, and GraphQL schema
//! 5. Serve HTTP until shutdown, then close the hub and the pool

mod error;

use std::path::Path;
use std::sync::Arc;

use patron_api::{AppState, ServerConfig, start_server};
use patron_core::config::{LoggingConfig, ServiceConfig, StorageBackend, StorageConfig};
use patron_core::{CustomerService, CustomerStore, EventHub, HubConfig, InMemoryStore};
use patron_db::{PgCustomerStore, PostgresPool};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::AppError;

/// Path of the YAML configuration file, relative to the working directory.
const CONFIG_PATH: &str = "patron-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the store, or the server fails.
#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Load configuration.
    let (config, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("patron-server starting");
    if !from_file {
        info!("Config file not found, using defaults");
    }
    info!(
        host = %config.server.host,
        port = config.server.port,
        storage = ?config.storage.backend,
        replay_capacity = config.events.replay_capacity,
        max_backlog = ?config.events.max_backlog,
        "Configuration loaded"
    );

    // 3. Open the store.
    let (store, pool) = open_store(&config.storage).await?;

    // 4. Build hub, service, and schema.
    let hub = EventHub::new(HubConfig::from(&config.events));
    let service = CustomerService::new(store, hub.clone());
    let state = Arc::new(AppState::new(service));

    // 5. Serve until shutdown.
    let server_config = ServerConfig::from(&config.server);
    start_server(&server_config, state, async move {
        shutdown_signal().await;
        info!(
            subscribers = hub.subscriber_count(),
            "Shutdown requested, closing event hub"
        );
        hub.close();
    })
    .await?;

    if let Some(pool) = pool {
        pool.close().await;
    }
    info!("patron-server stopped");
    Ok(())
}

/// Load configuration from [`CONFIG_PATH`].
///
/// Returns the configuration and whether it came from the file.
/// Environment overrides are applied either way.
fn load_config() -> Result<(ServiceConfig, bool), AppError> {
    let config_path = Path::new(CONFIG_PATH);
    if config_path.exists() {
        Ok((ServiceConfig::from_file(config_path)?, true))
    } else {
        Ok((ServiceConfig::parse("")?, false))
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Open the configured store.
///
/// For `PostgreSQL` the pool is returned too so it can be closed on
/// shutdown.
async fn open_store(
    storage: &StorageConfig,
) -> Result<(Arc<dyn CustomerStore>, Option<PostgresPool>), AppError> {
    match storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory customer store");
            let store: Arc<dyn CustomerStore> = Arc::new(InMemoryStore::new());
            Ok((store, None))
        }
        StorageBackend::Postgres => {
            let pool = PostgresPool::connect(storage).await?;
            pool.run_migrations().await?;
            info!("Using PostgreSQL customer store");
            let store: Arc<dyn CustomerStore> = Arc::new(PgCustomerStore::new(&pool));
            Ok((store, Some(pool)))
        }
    }
}

/// Resolve when the process receives `Ctrl-C`.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C, shutting down");
    }
}
