use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// One connected dashboard client: bus events flow out as JSON frames;
/// inbound frames only carry keepalive pings.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection_id = Uuid::new_v4();
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    info!(connection_id = %connection_id, "WebSocket connected");

    // Forward bus events into the outbound channel.
    let mut events = state.bus.subscribe();
    let event_tx = tx.clone();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            let Ok(frame) = serde_json::to_string(&event) else {
                continue;
            };
            if event_tx.send(frame).is_err() {
                break;
            }
        }
    });

    // Drain the outbound channel onto the socket.
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_sender.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    // Inbound: answer pings, ignore everything else, stop on close.
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            match message {
                Message::Text(text) => {
                    let parsed: serde_json::Value =
                        serde_json::from_str(&text).unwrap_or_default();
                    if parsed["type"] == "ping" {
                        let _ = tx.send(serde_json::json!({"type": "pong"}).to_string());
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }
    event_task.abort();
    info!(connection_id = %connection_id, "WebSocket disconnected");
}
