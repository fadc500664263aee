//! Websocket endpoint
//!
//! `GET /ws?room=<name>&account_id=<opt>` upgrades and subscribes the socket
//! to one room on the fan-out hub. Inbound `ping` messages are answered
//! inline with a `pong`; everything the hub routes to the connection is
//! forwarded out as JSON text frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use postqueue_core::websocket::{create_message, EVENT_PING, EVENT_PONG};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub room: Option<String>,
    pub account_id: Option<String>,
}

/// GET /ws
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let room = query.room.unwrap_or_else(|| "default".to_string());
    let account_id = query.account_id.filter(|a| !a.is_empty());
    ws.on_upgrade(move |socket| handle_socket(socket, state, room, account_id))
}

async fn handle_socket(socket: WebSocket, state: AppState, room: String, account_id: Option<String>) {
    let (connection_id, mut outbound) = state.hub.connect(&room, account_id);
    let (mut sink, mut stream) = socket.split();

    // Forward everything the hub routes to this connection
    let writer = tokio::spawn(async move {
        while let Some(envelope) = outbound.recv().await {
            let text = match serde_json::to_string(&envelope) {
                Ok(text) => text,
                Err(e) => {
                    warn!(error = %e, "failed to encode websocket envelope");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    // Read loop: keepalive plus disconnect detection
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
                    continue;
                };
                if value.get("type").and_then(|t| t.as_str()) == Some(EVENT_PING) {
                    state.hub.send_to(
                        connection_id,
                        create_message(EVENT_PONG, json!({"message": "pong"}), None),
                    );
                } else {
                    debug!(
                        %room,
                        message_type = value.get("type").and_then(|t| t.as_str()).unwrap_or("-"),
                        "websocket message received"
                    );
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    state.hub.disconnect(connection_id);
    writer.abort();
}
