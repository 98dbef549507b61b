//! HTTP endpoint handlers for the API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Minimal HTML status page |
//! | `POST` | `/graphql` | GraphQL queries and mutations |
//! | `GET` | `/health` | Liveness and hub counters |
//! | `GET` | `/api/plan-cache` | Query plan cache statistics |

use std::sync::Arc;

use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::Json;
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use chrono::Utc;
use patron_core::PlanCacheStats;

use crate::state::AppState;

// ---------------------------------------------------------------------------
// POST /graphql
// ---------------------------------------------------------------------------

/// Execute a GraphQL request against the schema.
pub async fn graphql(State(state): State<Arc<AppState>>, req: GraphQLRequest) -> GraphQLResponse {
    state.schema.execute(req.into_inner()).await.into()
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

/// Report liveness along with event hub counters.
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.hub();
    let uptime_secs = Utc::now()
        .signed_duration_since(state.started_at)
        .num_seconds();
    Json(serde_json::json!({
        "status": if hub.is_closed() { "shutting_down" } else { "ok" },
        "subscribers": hub.subscriber_count(),
        "replay_buffered": hub.replay_len(),
        "uptime_secs": uptime_secs,
    }))
}

// ---------------------------------------------------------------------------
// GET /api/plan-cache
// ---------------------------------------------------------------------------

/// Return hit, miss, and discard counters for the query plan cache.
pub async fn plan_cache_stats(State(state): State<Arc<AppState>>) -> Json<PlanCacheStats> {
    Json(state.plan_cache.stats())
}

// ---------------------------------------------------------------------------
// GET / -- minimal HTML status page
// ---------------------------------------------------------------------------

/// Serve a minimal HTML page showing server status and endpoint links.
pub async fn index(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hub = state.hub();
    let subscribers = hub.subscriber_count();
    let replay = hub.replay_len();
    let stats = state.plan_cache.stats();
    let plans = stats.entries;
    let hits = stats.hits;
    let misses = stats.misses;
    let started = state.started_at.to_rfc3339();

    Html(format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>Patron</title>
    <style>
        body {{
            background: #0d1117;
            color: #c9d1d9;
            font-family: 'Cascadia Code', 'Fira Code', 'Consolas', monospace;
            padding: 2rem;
            max-width: 800px;
            margin: 0 auto;
        }}
        h1 {{ color: #58a6ff; margin-bottom: 0.25rem; }}
        .subtitle {{ color: #8b949e; margin-top: 0; }}
        .metric {{
            display: inline-block;
            background: #161b22;
            border: 1px solid #30363d;
            border-radius: 6px;
            padding: 1rem 1.5rem;
            margin: 0.5rem 0.5rem 0.5rem 0;
            min-width: 120px;
        }}
        .metric .label {{ color: #8b949e; font-size: 0.85rem; }}
        .metric .value {{ color: #58a6ff; font-size: 1.5rem; font-weight: bold; }}
        a {{ color: #58a6ff; text-decoration: none; }}
        ul {{ list-style: none; padding: 0; }}
        li {{ padding: 0.3rem 0; }}
    </style>
</head>
<body>
    <h1>Patron</h1>
    <p class="subtitle">Customer GraphQL service, up since {started}</p>

    <div>
        <div class="metric">
            <div class="label">Subscribers</div>
            <div class="value">{subscribers}</div>
        </div>
        <div class="metric">
            <div class="label">Replay buffer</div>
            <div class="value">{replay}</div>
        </div>
        <div class="metric">
            <div class="label">Cached plans</div>
            <div class="value">{plans}</div>
        </div>
        <div class="metric">
            <div class="label">Plan hits / misses</div>
            <div class="value">{hits} / {misses}</div>
        </div>
    </div>

    <h2>Endpoints</h2>
    <ul>
        <li><code>POST /graphql</code> -- Queries and mutations</li>
        <li><code>ws://host:port/graphql/ws</code> -- GraphQL subscriptions</li>
        <li><code>ws://host:port/ws/events</code> -- Raw change event feed (?replay=N)</li>
        <li><a href="/health">/health</a> -- Liveness</li>
        <li><a href="/api/plan-cache">/api/plan-cache</a> -- Plan cache statistics</li>
    </ul>
</body>
</html>"#
    ))
}
