//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection: inbound
//! frames are decoded and dispatched through the [`ChatGateway`], and the
//! session's outbox is drained onto the socket.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use super::messages::{ClientEvent, decode, encode};
use crate::domain::{ServerEvent, SessionId};
use crate::error::ChatError;
use crate::service::ChatGateway;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - The first frame must be `connect`; anything else before it is answered
///   with an `unauthenticated` error.
/// - Every error is reported to this connection only.
/// - On close the session is removed from the gateway.
pub async fn run_connection(socket: WebSocket, gateway: Arc<ChatGateway>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();
    let mut session: Option<SessionId> = None;

    loop {
        tokio::select! {
            // Incoming frame from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_text(&gateway, &mut session, &outbox_tx, text.as_str()).await {
                            tracing::debug!(session_id = ?session, code = e.code(), error = %e, "request failed");
                            let _ = outbox_tx.send(ServerEvent::from(&e));
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
            // Event queued for this session
            event = outbox_rx.recv() => {
                let Some(event) = event else { break };
                match encode(&event) {
                    Ok(json) => {
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(event = event.event_type_str(), error = %e, "failed to encode event");
                    }
                }
            }
        }
    }

    if let Some(session_id) = session {
        gateway.disconnect(session_id).await;
    }
    tracing::debug!("ws connection closed");
}

/// Decodes one text frame and routes it.
async fn handle_text(
    gateway: &ChatGateway,
    session: &mut Option<SessionId>,
    outbox: &mpsc::UnboundedSender<ServerEvent>,
    text: &str,
) -> Result<(), ChatError> {
    let event = decode(text)?;
    match (*session, event) {
        (
            None,
            ClientEvent::Connect {
                user_id,
                display_name,
                auth_token,
            },
        ) => {
            let handle = gateway
                .connect(user_id, display_name, &auth_token, outbox.clone())
                .await?;
            *session = Some(handle.session_id());
            Ok(())
        }
        (None, _) => Err(ChatError::Unauthenticated),
        (Some(session_id), event) => gateway.dispatch(session_id, event).await,
    }
}
