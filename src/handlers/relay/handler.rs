//! WebSocket handler for relay clients.
//!
//! Each connection gets a dedicated sender task draining an mpsc queue, so
//! the heartbeat, the upstream listener, and the receive loop below can all
//! write to the client without sharing the sink.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::RelayError;
use crate::handlers::relay::messages::{IncomingMessage, MAX_INBOUND_FRAME_BYTES, OutgoingMessage};
use crate::session::transport::{ChannelClient, MessageRoute};
use crate::state::AppState;

const SENDER_QUEUE: usize = 1024;

#[derive(Debug, Deserialize)]
pub struct RelayParams {
    /// Client-chosen session id; a UUID is assigned when absent.
    pub client_id: Option<String>,
}

/// `GET /ws/realtime-chat` upgrade handler.
pub async fn relay_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<RelayParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let client_id = params
        .client_id
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, client_id))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client_id: String) {
    info!(client_id = %client_id, "relay client connected");
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (route_tx, mut route_rx) = mpsc::channel::<MessageRoute>(SENDER_QUEUE);
    let sender_task = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            match route {
                MessageRoute::Text(text) => {
                    if ws_sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                MessageRoute::Close => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    let client = Arc::new(ChannelClient::new(route_tx));
    state.registry.connect(client_id.clone(), client).await;

    while let Some(frame) = ws_receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                process_text_frame(&state, &client_id, text.as_str()).await;
            }
            Ok(Message::Close(_)) => {
                debug!(client_id = %client_id, "client sent close");
                break;
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Binary(_)) => {
                debug!(client_id = %client_id, "ignoring binary frame");
            }
            Err(err) => {
                warn!(client_id = %client_id, error = %err, "client socket error");
                break;
            }
        }
        // A failed outbound send reaps the session out from under us.
        if state.registry.get(&client_id).is_none() {
            break;
        }
    }

    state.registry.disconnect(&client_id).await;
    sender_task.abort();
    info!(client_id = %client_id, "relay client disconnected");
}

/// Parse and dispatch one inbound frame. Malformed input gets one `error`
/// reply and the loop keeps going.
async fn process_text_frame(state: &Arc<AppState>, client_id: &str, text: &str) {
    if text.len() > MAX_INBOUND_FRAME_BYTES {
        state
            .registry
            .send(
                &OutgoingMessage::error(format!("Message too large ({} bytes)", text.len())),
                client_id,
            )
            .await;
        return;
    }

    let message: IncomingMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(err) => {
            let err = RelayError::MalformedMessage(err.to_string());
            debug!(client_id = %client_id, error = %err, "malformed client message");
            state
                .registry
                .send(&OutgoingMessage::error(err.to_string()), client_id)
                .await;
            return;
        }
    };

    match message {
        IncomingMessage::ConnectUpstream { model } => {
            let model = model.unwrap_or_else(|| state.bridge.default_model().to_string());
            let connected = state.bridge.connect(client_id, &model).await.is_ok();
            state
                .registry
                .send(
                    &OutgoingMessage::status(connected, Some(model), None),
                    client_id,
                )
                .await;
        }
        IncomingMessage::UserMessage { text } => {
            if let Err(err) = state.bridge.send_user_text(client_id, text).await {
                debug!(client_id = %client_id, error = %err, "user message not delivered");
            }
        }
        IncomingMessage::AudioMessage {
            audio_data,
            format,
            sample_rate,
            channels,
        } => {
            debug!(
                client_id = %client_id,
                format = %format,
                sample_rate,
                channels,
                chars = audio_data.len(),
                "client audio turn"
            );
            if let Err(err) = state.bridge.send_user_audio(client_id, audio_data).await {
                debug!(client_id = %client_id, error = %err, "audio message not delivered");
            }
        }
        IncomingMessage::SendToUpstream { message } => {
            if let Err(err) = state.bridge.send_raw(client_id, message).await {
                debug!(client_id = %client_id, error = %err, "raw event not delivered");
            }
        }
        IncomingMessage::DisconnectUpstream => {
            let _ = state.bridge.disconnect(client_id).await;
            state
                .registry
                .send(&OutgoingMessage::status(false, None, None), client_id)
                .await;
        }
    }
}
