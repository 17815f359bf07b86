//! Live update channel.
//!
//! Forwards every hub broadcast to the socket and answers each text frame
//! with a pong.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;

use crate::services::NotificationHub;
use crate::startup::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = state.notifier.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>) {
    let (connection_id, mut notifications) = hub.register();
    let (mut sender, mut receiver) = socket.split();

    tracing::info!(connection_id, "WebSocket connected");

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                // `None` means the hub dropped this observer.
                let Some(notification) = notification else { break };
                let text = match serde_json::to_string(&notification) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to encode notification");
                        continue;
                    }
                };
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(_))) => {
                    let pong = json!({ "type": "pong" }).to_string();
                    if sender.send(Message::Text(pong)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            }
        }
    }

    hub.deregister(connection_id);
    tracing::info!(connection_id, "WebSocket disconnected");
}
