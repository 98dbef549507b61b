//! GraphQL and `WebSocket` API for the Patron customer service.
//!
//! This crate provides an Axum HTTP server that exposes:
//!
//! - **GraphQL** (`POST /graphql`) for customer queries and mutations
//! - **GraphQL subscriptions** (`/graphql/ws`) streaming change events
//! - **Raw event feed** (`/ws/events`) with one JSON frame per change
//! - **Operational endpoints**: `/health`, `/api/plan-cache`, and a
//!   minimal HTML status page at `/`
//!
//! Query documents are parsed through a shared plan cache (see
//! [`plan_cache`]) and every subscriber gets its own hub queue.

pub mod error;
pub mod handlers;
pub mod plan_cache;
pub mod router;
pub mod schema;
pub mod server;
pub mod state;
pub mod ws;

// Re-export primary types for convenience.
pub use router::build_router;
pub use schema::{PatronSchema, build_schema};
pub use server::{ServerConfig, ServerError, start_server};
pub use state::AppState;
