//! Manages one client's WebSocket connection to the relay.

use super::turn::run_turn;
use crate::state::AppState;
use anyhow::Result;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use jarvis_core::{
    mode::AssistantMode,
    protocol::{InboundEvent, OutboundEvent},
};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, instrument, warn};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual WebSocket connection.
///
/// Greets the client with `mode_change{idle}`, then forwards every broadcast
/// frame to it while handling whatever it sends.
#[instrument(name = "ws_client", skip_all, fields(client_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let client_id: u32 = rand::random();
    tracing::Span::current().record("client_id", client_id);

    // Subscribe before greeting so nothing broadcast in between is missed.
    let mut events = state.subscribe();
    info!(clients = state.client_count(), "Client connected.");

    let (mut socket_tx, mut socket_rx) = socket.split();
    let greeting = InboundEvent::ModeChange {
        mode: AssistantMode::Idle,
        intensity: None,
    };
    if let Err(e) = send_event(&mut socket_tx, &greeting).await {
        debug!(error = ?e, "Could not send greeting; client already gone.");
        return;
    }

    loop {
        tokio::select! {
            incoming = socket_rx.next() => match incoming {
                Some(Ok(Message::Text(text))) => handle_client_message(&state, text.as_str()),
                Some(Ok(Message::Close(_))) | None => {
                    info!("Client disconnected.");
                    break;
                }
                Some(Ok(Message::Binary(_))) => warn!("Ignoring binary frame."),
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(error = ?e, "Client connection closed unexpectedly.");
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(frame) => {
                    if socket_tx.send(Message::Text(frame.into())).await.is_err() {
                        debug!("Client went away during broadcast.");
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Client fell behind; frames dropped.");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

/// Dispatches one text frame from a client.
fn handle_client_message(state: &Arc<AppState>, text: &str) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(_) => {
            error!(frame = text, "Invalid JSON received.");
            return;
        }
    };
    let kind = value
        .get("type")
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string();

    match serde_json::from_value::<OutboundEvent>(value) {
        Ok(OutboundEvent::TextInput { text }) => {
            let text = text.trim().to_string();
            if text.is_empty() {
                debug!("Ignoring blank text_input.");
                return;
            }
            tokio::spawn(run_turn(state.clone(), text));
        }
        Ok(OutboundEvent::EnableMic) => {
            if state.set_mic_enabled(true) {
                info!("Microphone enabled.");
            } else {
                debug!("Microphone already enabled.");
            }
            state.broadcast(InboundEvent::ModeChange {
                mode: AssistantMode::Listening,
                intensity: None,
            });
        }
        Ok(OutboundEvent::DisableMic) => {
            if state.set_mic_enabled(false) {
                info!("Microphone disabled.");
            } else {
                debug!("Microphone already disabled.");
            }
            state.broadcast(InboundEvent::ModeChange {
                mode: AssistantMode::Idle,
                intensity: None,
            });
        }
        Err(e) => warn!(%kind, error = %e, "Unknown message type."),
    }
}

/// A helper function to serialize and send one event to a client.
pub(crate) async fn send_event(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    event: &InboundEvent,
) -> Result<()> {
    let serialized = serde_json::to_string(event)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}
