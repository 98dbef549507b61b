//! Query-plan caching, change broadcasting, and customer orchestration for
//! the Patron service.
//!
//! This crate holds the pieces of the service with real concurrency
//! contracts. Transport (HTTP, GraphQL, WebSocket) and the `PostgreSQL`
//! adapter live in other crates and only talk to the types exported here.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `patron-config.yaml`.
//! - [`error`] -- [`ServiceError`] and its client-facing codes.
//! - [`event_hub`] -- [`EventHub`], a lossless multicast of change events
//!   with a bounded replay buffer.
//! - [`plan_cache`] -- [`QueryPlanCache`], memoized parse results keyed by
//!   query text.
//! - [`service`] -- [`CustomerService`], CRUD that emits one event per
//!   committed mutation.
//! - [`store`] -- [`CustomerStore`] trait and [`InMemoryStore`].
//!
//! [`ServiceError`]: error::ServiceError
//! [`EventHub`]: event_hub::EventHub
//! [`QueryPlanCache`]: plan_cache::QueryPlanCache
//! [`CustomerService`]: service::CustomerService
//! [`CustomerStore`]: store::CustomerStore
//! [`InMemoryStore`]: store::InMemoryStore

pub mod config;
pub mod error;
pub mod event_hub;
pub mod plan_cache;
pub mod service;
pub mod store;

pub use error::ServiceError;
pub use event_hub::{EventHub, EventStream, HubConfig};
pub use plan_cache::{PlanCacheError, PlanCacheStats, QueryPlanCache};
pub use service::CustomerService;
pub use store::{CustomerStore, InMemoryStore, StoreError};
