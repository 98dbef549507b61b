//! `PostgreSQL` persistence for the Patron customer service.
//!
//! Customers are stored as JSONB documents keyed by id. This crate plugs
//! into the service through the [`CustomerStore`](patron_core::CustomerStore)
//! trait; nothing above it knows about SQL.
//!
//! # Modules
//!
//! - [`postgres`] -- Connection pool built from the storage config
//! - [`customer_store`] -- [`PgCustomerStore`], the document table adapter
//! - [`error`] -- Shared error types

pub mod customer_store;
pub mod error;
pub mod postgres;

pub use customer_store::{DocumentRow, PgCustomerStore};
pub use error::DbError;
pub use postgres::PostgresPool;
