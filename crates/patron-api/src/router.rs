//! Axum router construction for the API server.

use std::sync::Arc;

use async_graphql_axum::GraphQLSubscription;
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::state::AppState;
use crate::ws;

/// Build the complete Axum router.
///
/// The router includes:
/// - `GET /` -- minimal HTML status page
/// - `POST /graphql` -- GraphQL queries and mutations
/// - `GET /graphql/ws` -- GraphQL subscriptions over `WebSocket`
/// - `GET /ws/events` -- raw JSON change event feed
/// - `GET /health` -- liveness
/// - `GET /api/plan-cache` -- plan cache statistics
///
/// CORS allows any origin.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handlers::index))
        .route("/graphql", post(handlers::graphql))
        .route_service(
            "/graphql/ws",
            GraphQLSubscription::new(state.schema.clone()),
        )
        .route("/ws/events", get(ws::ws_events))
        .route("/health", get(handlers::health))
        .route("/api/plan-cache", get(handlers::plan_cache_stats))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
