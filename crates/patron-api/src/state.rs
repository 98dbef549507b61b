//! Shared application state for the API server.
//!
//! [`AppState`] is built once at startup, wrapped in [`Arc`], and injected
//! via Axum's `State` extractor. It owns the schema and keeps handles to
//! the pieces the plain HTTP endpoints report on.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use patron_core::{CustomerService, EventHub, QueryPlanCache};

use crate::plan_cache::SharedPlanCache;
use crate::schema::{PatronSchema, build_schema};

/// Shared state for the Axum application.
#[derive(Clone)]
pub struct AppState {
    /// Customer operations.
    pub service: CustomerService,
    /// The executable GraphQL schema.
    pub schema: PatronSchema,
    /// Parsed query documents, shared with the schema's parse hook.
    pub plan_cache: SharedPlanCache,
    /// When this state was built.
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Build the schema around `service` with a fresh plan cache.
    pub fn new(service: CustomerService) -> Self {
        let plan_cache: SharedPlanCache = Arc::new(QueryPlanCache::new());
        let schema = build_schema(service.clone(), Arc::clone(&plan_cache));
        Self {
            service,
            schema,
            plan_cache,
            started_at: Utc::now(),
        }
    }

    /// The hub change events are published on.
    pub const fn hub(&self) -> &EventHub {
        self.service.hub()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("service", &self.service)
            .field("plan_cache", &self.plan_cache.stats())
            .field("started_at", &self.started_at)
            .finish_non_exhaustive()
    }
}
