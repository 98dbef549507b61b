//! Integration tests for the GraphQL schema and HTTP endpoints.
//!
//! Schema tests execute requests directly against [`PatronSchema`].
//! Endpoint tests use Axum's `Router` via `tower::ServiceExt` without
//! starting a TCP server. The raw event feed needs a real `WebSocket`
//! handshake, so its tests serve the router on an ephemeral port.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::Arc;
use std::time::Duration;

use async_graphql::{Request as GqlRequest, Response as GqlResponse, Variables};
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use futures::{Stream, StreamExt};
use patron_api::router::build_router;
use patron_api::state::AppState;
use patron_core::{CustomerService, EventHub, InMemoryStore};
use patron_types::{ChangeKind, CustomerId};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tower::ServiceExt;

const CREATE_ALIA: &str = r#"mutation {
    createCustomer(input: {firstName: "Alia", lastName: "Al-Otaibi", email: "alia@example.com", phone: "0555"}) {
        id firstName lastName email phone
    }
}"#;

fn make_test_state() -> Arc<AppState> {
    let service = CustomerService::new(Arc::new(InMemoryStore::new()), EventHub::default());
    Arc::new(AppState::new(service))
}

async fn execute(state: &AppState, query: &str) -> GqlResponse {
    state.schema.execute(GqlRequest::new(query)).await
}

fn data(response: GqlResponse) -> Value {
    assert!(response.errors.is_empty(), "{:?}", response.errors);
    response.data.into_json().unwrap()
}

fn error_extension(response: &GqlResponse, key: &str) -> Value {
    let ext = response.errors[0]
        .extensions
        .as_ref()
        .expect("error has extensions");
    ext.get(key).cloned().unwrap().into_json().unwrap()
}

async fn create_alia(state: &AppState) -> String {
    let json = data(execute(state, CREATE_ALIA).await);
    json["createCustomer"]["id"].as_str().unwrap().to_owned()
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// =========================================================================
// Schema
// =========================================================================

#[tokio::test]
async fn create_returns_customer_and_emits_event() {
    let state = make_test_state();
    let mut events = state.hub().subscribe();

    let json = data(execute(&state, CREATE_ALIA).await);
    let customer = &json["createCustomer"];
    assert_eq!(customer["firstName"], "Alia");
    assert_eq!(customer["email"], "alia@example.com");

    let event = timeout(Duration::from_secs(1), events.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.kind, ChangeKind::Created);
    assert_eq!(event.customer_id.as_str(), customer["id"].as_str().unwrap());
}

#[tokio::test]
async fn customers_and_customer_by_id() {
    let state = make_test_state();
    let id = create_alia(&state).await;

    let json = data(execute(&state, "{ customers { id firstName } }").await);
    assert_eq!(json["customers"].as_array().unwrap().len(), 1);

    let query = format!(r#"{{ customerById(id: "{id}") {{ lastName phone }} }}"#);
    let json = data(execute(&state, &query).await);
    assert_eq!(json["customerById"]["lastName"], "Al-Otaibi");
    assert_eq!(json["customerById"]["phone"], "0555");
}

#[tokio::test]
async fn update_changes_only_provided_fields() {
    let state = make_test_state();
    let id = create_alia(&state).await;

    let query = format!(
        r#"mutation {{ updateCustomer(input: {{id: "{id}", firstName: "Sara"}}) {{ id firstName lastName email phone }} }}"#
    );
    let json = data(execute(&state, &query).await);
    let updated = &json["updateCustomer"];
    assert_eq!(updated["id"], id.as_str());
    assert_eq!(updated["firstName"], "Sara");
    assert_eq!(updated["lastName"], "Al-Otaibi");
    assert_eq!(updated["email"], "alia@example.com");
    assert_eq!(updated["phone"], "0555");
}

#[tokio::test]
async fn delete_missing_customer_is_not_found_every_time() {
    let state = make_test_state();
    let events = state.hub().subscribe();

    for _ in 0..2 {
        let response = execute(&state, r#"mutation { deleteCustomer(id: "nonexistent") }"#).await;
        assert_eq!(response.errors.len(), 1);
        assert_eq!(error_extension(&response, "code"), "NOT_FOUND");
        assert_eq!(
            error_extension(&response, "classification"),
            "DataFetchingException"
        );
        assert!(response.errors[0].message.contains("nonexistent"));
    }
    assert_eq!(events.backlog(), 0);
}

#[tokio::test]
async fn delete_existing_customer_returns_true() {
    let state = make_test_state();
    let id = create_alia(&state).await;

    let query = format!(r#"mutation {{ deleteCustomer(id: "{id}") }}"#);
    let json = data(execute(&state, &query).await);
    assert_eq!(json["deleteCustomer"], true);

    let query = format!(r#"{{ customerById(id: "{id}") {{ id }} }}"#);
    let response = execute(&state, &query).await;
    assert_eq!(error_extension(&response, "code"), "NOT_FOUND");
}

#[tokio::test]
async fn invalid_email_is_a_validation_error() {
    let state = make_test_state();
    let response = execute(
        &state,
        r#"mutation { createCustomer(input: {firstName: "Alia", lastName: "Al-Otaibi", email: "not-an-email"}) { id } }"#,
    )
    .await;
    assert_eq!(error_extension(&response, "code"), "VALIDATION_ERROR");
    assert_eq!(
        error_extension(&response, "classification"),
        "ValidationError"
    );
}

#[tokio::test]
async fn repeated_query_is_parsed_and_validated_once() {
    let state = make_test_state();
    let query = "{ customers { id } }";
    for _ in 0..5 {
        data(execute(&state, query).await);
    }
    let stats = state.plan_cache.stats();
    assert_eq!(stats.entries, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 4);

    let plan = state.plan_cache.get(query).unwrap();
    assert!(plan.validation().is_some_and(Result::is_ok));
}

#[tokio::test]
async fn syntax_error_is_cached_and_replayed() {
    let state = make_test_state();
    let broken = "{ customers { id ";

    let first = execute(&state, broken).await;
    let second = execute(&state, broken).await;

    assert_eq!(error_extension(&first, "code"), "VALIDATION_ERROR");
    assert_eq!(first.errors[0].message, second.errors[0].message);
    let stats = state.plan_cache.stats();
    assert_eq!((stats.entries, stats.misses, stats.hits), (1, 1, 1));
}

#[tokio::test]
async fn schema_violation_is_validated_once_and_replayed() {
    let state = make_test_state();
    let query = "{ customers { shoeSize } }";

    let first = execute(&state, query).await;
    let second = execute(&state, query).await;

    assert_eq!(first.errors.len(), 1);
    assert_eq!(first.errors[0].message, second.errors[0].message);
    let plan = state.plan_cache.get(query).unwrap();
    assert!(matches!(plan.validation(), Some(Err(errors)) if errors.len() == 1));
}

#[tokio::test]
async fn requests_with_variables_reuse_parse_but_not_validation() {
    let state = make_test_state();
    let id = create_alia(&state).await;
    let query = "query($id: ID!) { customerById(id: $id) { firstName } }";

    for _ in 0..2 {
        let request = GqlRequest::new(query)
            .variables(Variables::from_json(serde_json::json!({ "id": id })));
        let json = data(state.schema.execute(request).await);
        assert_eq!(json["customerById"]["firstName"], "Alia");
    }

    let plan = state.plan_cache.get(query).unwrap();
    assert!(plan.document().is_ok());
    assert!(plan.validation().is_none());
}

#[tokio::test]
async fn subscription_receives_live_events() {
    let state = make_test_state();
    let mut stream = state
        .schema
        .execute_stream(GqlRequest::new(
            "subscription { customerEvents { customerId kind message } }",
        ))
        .boxed();

    // The subscription attaches to the hub on first poll.
    for _ in 0..50 {
        if state.hub().subscriber_count() > 0 {
            break;
        }
        let _ = timeout(Duration::from_millis(10), stream.next()).await;
    }
    assert_eq!(state.hub().subscriber_count(), 1);

    let id = create_alia(&state).await;
    let response = timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    let json = data(response);
    assert_eq!(json["customerEvents"]["customerId"], id.as_str());
    assert_eq!(json["customerEvents"]["kind"], "CREATED");
    assert_eq!(
        json["customerEvents"]["message"],
        "New customer created successfully"
    );

    drop(stream);
    assert_eq!(state.hub().subscriber_count(), 0);
}

#[tokio::test]
async fn subscription_replays_recent_events() {
    let state = make_test_state();
    let id = create_alia(&state).await;

    let mut stream = state
        .schema
        .execute_stream(GqlRequest::new(
            "subscription { customerEvents(replayLast: 5) { customerId kind } }",
        ))
        .boxed();
    let response = timeout(Duration::from_secs(1), stream.next())
        .await
        .unwrap()
        .unwrap();
    let json = data(response);
    assert_eq!(json["customerEvents"]["customerId"], id.as_str());
    assert_eq!(json["customerEvents"]["kind"], "CREATED");
}

// =========================================================================
// HTTP endpoints
// =========================================================================

#[tokio::test]
async fn test_index_returns_html() {
    let router = build_router(make_test_state());

    let response = router
        .oneshot(Request::get("/").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let html = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(html.contains("Patron"));
    assert!(html.contains("/graphql"));
}

#[tokio::test]
async fn test_health() {
    let state = make_test_state();
    let _events = state.hub().subscribe();
    let router = build_router(Arc::clone(&state));

    let response = router
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["subscribers"], 1);
    assert!(json["uptime_secs"].as_i64().is_some_and(|secs| secs >= 0));
}

#[tokio::test]
async fn test_graphql_post_and_plan_cache_stats() {
    let state = make_test_state();
    let body = serde_json::json!({ "query": "{ customers { id } }" }).to_string();

    for _ in 0..2 {
        let response = build_router(Arc::clone(&state))
            .oneshot(
                Request::post("/graphql")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.clone()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_to_json(response.into_body()).await;
        assert_eq!(json["data"]["customers"], serde_json::json!([]));
    }

    let response = build_router(state)
        .oneshot(Request::get("/api/plan-cache").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["entries"], 1);
    assert_eq!(json["misses"], 1);
    assert_eq!(json["hits"], 1);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let router = build_router(make_test_state());
    let response = router
        .oneshot(Request::get("/api/missing").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// =========================================================================
// Raw event feed
// =========================================================================

async fn serve(state: Arc<AppState>) -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

async fn wait_for_subscribers(state: &AppState, expected: usize) {
    for _ in 0..100 {
        if state.hub().subscriber_count() == expected {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(state.hub().subscriber_count(), expected);
}

async fn next_frame<S>(ws: &mut S) -> Value
where
    S: Stream<Item = Result<Message, WsError>> + Unpin,
{
    let message = timeout(Duration::from_secs(1), ws.next())
        .await
        .expect("frame within deadline")
        .expect("socket open")
        .unwrap();
    serde_json::from_str(message.to_text().unwrap()).unwrap()
}

#[tokio::test]
async fn event_feed_sends_one_json_frame_per_event() {
    let state = make_test_state();
    let addr = serve(Arc::clone(&state)).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/events"))
        .await
        .unwrap();
    wait_for_subscribers(&state, 1).await;

    let id = create_alia(&state).await;
    state
        .service
        .delete(&CustomerId::from(id.as_str()))
        .await
        .unwrap();

    let created = next_frame(&mut ws).await;
    assert_eq!(created["customer_id"], id.as_str());
    assert_eq!(created["kind"], "CREATED");
    assert_eq!(created["message"], "New customer created successfully");

    let deleted = next_frame(&mut ws).await;
    assert_eq!(deleted["customer_id"], id.as_str());
    assert_eq!(deleted["kind"], "DELETED");
}

#[tokio::test]
async fn event_feed_replays_then_detaches_on_close() {
    let state = make_test_state();
    let first = create_alia(&state).await;
    let addr = serve(Arc::clone(&state)).await;

    let (mut ws, _) = connect_async(format!("ws://{addr}/ws/events?replay=5"))
        .await
        .unwrap();
    let replayed = next_frame(&mut ws).await;
    assert_eq!(replayed["customer_id"], first.as_str());
    assert_eq!(replayed["kind"], "CREATED");
    assert_eq!(state.hub().subscriber_count(), 1);

    ws.close(None).await.unwrap();
    wait_for_subscribers(&state, 0).await;

    // Nobody is left to deliver to.
    let query = format!(r#"mutation {{ deleteCustomer(id: "{first}") }}"#);
    data(execute(&state, &query).await);
    assert_eq!(state.hub().subscriber_count(), 0);
}
