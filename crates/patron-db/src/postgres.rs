//! Connection pool for the `postgres` storage backend.
//!
//! Pool sizing and timeouts come straight from the `storage` section of
//! the service config. Queries are built at runtime, so no database is
//! needed at build time.

use patron_core::config::StorageConfig;
use sqlx::PgPool;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::error::DbError;

/// Shared pool over the customer database.
#[derive(Clone)]
pub struct PostgresPool {
    pool: PgPool,
}

impl PostgresPool {
    /// Open a pool as described by `storage`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if `postgres_url` cannot be parsed and
    /// [`DbError::Postgres`] if no connection can be established.
    pub async fn connect(storage: &StorageConfig) -> Result<Self, DbError> {
        let target = connect_options(&storage.postgres_url)?;
        let pool = pool_options(storage).connect_with(target).await?;

        tracing::info!(
            max_connections = storage.max_connections,
            connect_timeout_secs = storage.connect_timeout_secs,
            "Connected to customer database"
        );
        Ok(Self { pool })
    }

    /// Apply the bundled schema migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Migration`] if any migration fails.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Customer schema is up to date");
        Ok(())
    }

    /// The underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Wait for in-flight queries, then close every connection.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Customer database pool closed");
    }
}

impl std::fmt::Debug for PostgresPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresPool")
            .field("size", &self.pool.size())
            .finish_non_exhaustive()
    }
}

fn connect_options(url: &str) -> Result<PgConnectOptions, DbError> {
    url.parse()
        .map_err(|e: sqlx::Error| DbError::Config(format!("invalid postgres_url: {e}")))
}

fn pool_options(storage: &StorageConfig) -> PgPoolOptions {
    PgPoolOptions::new()
        .max_connections(storage.max_connections)
        .acquire_timeout(storage.connect_timeout())
        .idle_timeout(storage.idle_timeout())
}
