//! Push channel: on connect, replay the tail of the event ring buffer,
//! then stream every subsequent domain event as a `{type, data, timestamp}`
//! frame.

use super::RelayState;
use crate::events::DomainEvent;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Decrements the shared push-client gauge on drop, so every exit path out
/// of `handle_socket` (clean close, send error, lagged-out, task abort)
/// releases its slot without duplicating the decrement at each `return`.
struct ClientGuard(Arc<AtomicUsize>);

impl ClientGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Serialize)]
struct FeedEvent<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    data: &'a DomainEvent,
    timestamp: i64,
}

#[derive(Debug, Serialize)]
struct FeedHistory {
    #[serde(rename = "type")]
    kind: &'static str,
    data: Vec<serde_json::Value>,
}

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: RelayState) {
    let _guard = ClientGuard::new(state.push_clients.clone());

    let tail = state.history.tail(state.replay_len).await;
    let history_frame = FeedHistory {
        kind: "feedHistory",
        data: tail
            .iter()
            .map(|(event, ts)| {
                serde_json::json!({ "type": event.type_name(), "data": event, "timestamp": ts })
            })
            .collect(),
    };

    if let Ok(text) = serde_json::to_string(&history_frame) {
        if socket.send(Message::Text(text)).await.is_err() {
            return;
        }
    }

    let mut rx = state.events.subscribe();
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(event) => {
                        let frame = FeedEvent { kind: event.type_name(), data: &event, timestamp: chrono::Utc::now().timestamp() };
                        let Ok(text) = serde_json::to_string(&frame) else { continue };
                        if socket.send(Message::Text(text)).await.is_err() {
                            return;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "push client lagged behind event bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => return,
                    Some(Ok(_)) => {} // clients don't send anything meaningful upstream
                    Some(Err(_)) => return,
                }
            }
        }
    }
}
