use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use bell_protocol::{ClientEvent, ServerEvent};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc::channel;
use tracing::{debug, warn};

use crate::{api::AppState, error::BellError, gateway::Gateway, hub::OUTBOUND_QUEUE};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let gateway = state.gateway.clone();
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

fn parse_frame(text: &str) -> Result<ClientEvent, BellError> {
    serde_json::from_str(text).map_err(|e| BellError::validation(format!("malformed event: {e}")))
}

/// Pump one connection: a writer task drains the session's outbound queue
/// while this task feeds inbound frames to the gateway.
async fn handle_socket(stream: WebSocket, gateway: Arc<Gateway>) {
    let (mut sender, mut receiver) = stream.split();
    let (tx, mut rx) = channel::<ServerEvent>(OUTBOUND_QUEUE);
    let mut session = gateway.connect(tx);
    let session_id = session.id();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(e) => {
                    warn!(session = %session_id, error = %e, "failed to encode event");
                    continue;
                }
            };
            if sender.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    while let Some(frame) = receiver.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!(session = %session_id, error = %e, "socket error");
                break;
            }
        };
        let parsed = match msg {
            Message::Text(text) => parse_frame(&text),
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => parse_frame(text),
                Err(_) => Err(BellError::validation("frames must be UTF-8 JSON")),
            },
            Message::Close(_) => break,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        match parsed {
            Ok(event) => gateway.dispatch(&mut session, event),
            Err(err) => gateway.reject(&session, &err),
        }
    }

    gateway.disconnect(&mut session);
    // the hub held the only sender, so the writer drains and stops
    let _ = writer.await;
}
