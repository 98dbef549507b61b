//! `WebSocket` handler for the raw change event feed.
//!
//! Clients connect to `GET /ws/events` and receive one JSON-encoded
//! [`CustomerEvent`](patron_types::CustomerEvent) text frame per committed
//! change. `?replay=N` first sends up to `N` recent events. Each
//! connection owns its own hub subscription, so a slow client never holds
//! back anyone else; closing the socket drops the subscription.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::StreamExt;
use tracing::{debug, warn};

use crate::state::AppState;

/// Query parameters for `GET /ws/events`.
#[derive(Debug, Default, serde::Deserialize)]
pub struct FeedQuery {
    /// How many recent events to send before live ones.
    pub replay: Option<usize>,
}

/// Upgrade an HTTP request to a `WebSocket` connection and begin
/// streaming change events.
///
/// # Route
///
/// `GET /ws/events`
pub async fn ws_events(
    ws: WebSocketUpgrade,
    Query(query): Query<FeedQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws(socket, state, query.replay.unwrap_or(0)))
}

/// Handle the `WebSocket` lifecycle: subscribe to the hub and forward
/// each event as a text frame.
async fn handle_ws(mut socket: WebSocket, state: Arc<AppState>, replay: usize) {
    let mut events = state.hub().subscribe_with_replay(replay);
    debug!(subscriber = ?events.id(), replay, "WebSocket client connected");

    loop {
        tokio::select! {
            next = events.next() => {
                let Some(event) = next else {
                    debug!("Event stream ended, closing WebSocket");
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                };
                let json = match serde_json::to_string(&event) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("Failed to serialize customer event: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    debug!("WebSocket client disconnected (send failed)");
                    return;
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("WebSocket client disconnected");
                        return;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            debug!("WebSocket client disconnected (pong failed)");
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {e}");
                        return;
                    }
                    _ => {}
                }
            }
        }
    }
}
