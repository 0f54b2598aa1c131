//! WebSocket fan-out of status snapshots
//!
//! Every connected dashboard receives the current snapshot on connect and
//! each later one the controller publishes. Clients may send
//! `{"type":"config_update","config":{...}}` or
//! `{"type":"command","command":"turn_on"|"turn_off"|"resume"}`.

use super::AppState;
use crate::settings::HeaterSettings;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;

/// Messages accepted from dashboard clients
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    ConfigUpdate { config: HeaterSettings },
    Command { command: String },
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let logger = crate::logging::get_logger("ws");
    let mut rx = state.feed.subscribe();
    if let Ok(json) = serde_json::to_string(&state.feed.snapshot()) {
        if socket.send(Message::Text(json.into())).await.is_err() {
            return;
        }
    }
    logger.debug("Dashboard client connected");

    loop {
        tokio::select! {
            update = rx.recv() => match update {
                Ok(json) => {
                    if socket.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    logger.debug(&format!("Client lagged, skipped {} snapshots", skipped));
                }
                Err(RecvError::Closed) => break,
            },
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_client_message(&state, text.as_str()).await {
                        if socket.send(Message::Text(reply.into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
        }
    }
    logger.debug("Dashboard client disconnected");
}

/// Apply one client message; returns an error reply for the sender, if any.
/// Successful changes reach every client through the snapshot broadcast.
pub async fn handle_client_message(state: &AppState, text: &str) -> Option<String> {
    let msg = match serde_json::from_str::<ClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => return Some(error_reply(&format!("Invalid message: {}", e))),
    };
    let mut ctrl = state.controller.lock().await;
    let result = match msg {
        ClientMessage::ConfigUpdate { config } => ctrl.update_settings(config).await.map(|_| ()),
        ClientMessage::Command { command } => match command.as_str() {
            "turn_on" => ctrl.manual_turn(true).await.map(|_| ()),
            "turn_off" => ctrl.manual_turn(false).await.map(|_| ()),
            "resume" => {
                ctrl.resume().await;
                Ok(())
            }
            other => return Some(error_reply(&format!("Unknown command '{}'", other))),
        },
    };
    result.err().map(|e| error_reply(&e.to_string()))
}

fn error_reply(message: &str) -> String {
    serde_json::json!({ "type": "error", "message": message }).to_string()
}
