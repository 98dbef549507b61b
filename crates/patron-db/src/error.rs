//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] and [`serde_json`] errors. At the [`CustomerStore`] boundary
//! they are flattened into [`StoreError`] so the service never sees driver
//! types.
//!
//! [`CustomerStore`]: patron_core::CustomerStore

use patron_core::StoreError;

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<DbError> for StoreError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Postgres(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                match db.constraint() {
                    Some("customers_pkey") => {
                        Self::Conflict(String::from("customer id is already stored"))
                    }
                    _ => Self::Conflict(String::from("email is already registered")),
                }
            }
            other => Self::Backend(other.to_string()),
        }
    }
}
