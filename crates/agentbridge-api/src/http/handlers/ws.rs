//! WebSocket transport for the agent wire protocol.
//!
//! The `/ws` endpoint upgrades an HTTP connection to a WebSocket. Each
//! connection runs one task that:
//!
//! - **Reads frames:** parses text frames as [`ClientFrame`]s and forwards
//!   them to the hub (`register`, `envelope`, `heartbeat`).
//! - **Writes frames:** drains the outbound channel the hub delivers to once
//!   the connection is registered.
//!
//! When the hub drops the connection's outbound handle (heartbeat timeout,
//! replacement by a newer connection, forced disconnect) the socket is closed.
//! Closing the socket unregisters the client but keeps its offline queue.

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use agentbridge_core::registry::ConnectionHandle;
use agentbridge_types::error::HubError;
use agentbridge_types::wire::{ClientFrame, ServerFrame};

use crate::state::AppState;

/// Upgrade an HTTP request to a WebSocket connection.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// What the reader decided after handling one inbound frame.
enum Flow {
    Continue,
    Close,
}

/// Per-connection registration state.
#[derive(Default)]
struct Session {
    client_id: Option<String>,
    connection: Option<Uuid>,
    outbound: Option<mpsc::Receiver<ServerFrame>>,
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let mut session = Session::default();

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }

            frame = next_outbound(&mut session.outbound) => match frame {
                Some(frame) => {
                    if send_frame(&mut ws_sender, &frame).await.is_err() {
                        break;
                    }
                }
                None => {
                    tracing::info!(client_id = ?session.client_id, "hub released connection, closing socket");
                    session.client_id = None;
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            },

            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match process_frame(text.as_str(), &mut session, &state, &mut ws_sender).await {
                        Flow::Continue => {}
                        Flow::Close => break,
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(err)) => {
                    tracing::debug!("WebSocket receive error: {err}");
                    break;
                }
                // Binary, ping, pong protocol frames are handled by axum.
                Some(Ok(_)) => {}
            }
        }
    }

    if let Some(client_id) = session.client_id {
        if let Err(err) = state.hub.disconnect(&client_id, session.connection, false).await {
            tracing::debug!(%client_id, "disconnect after close failed: {err}");
        }
    }
    tracing::debug!("WebSocket connection closed");
}

async fn next_outbound(outbound: &mut Option<mpsc::Receiver<ServerFrame>>) -> Option<ServerFrame> {
    match outbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), axum::Error> {
    match frame.to_text() {
        Ok(text) => ws_sender.send(Message::Text(text.into())).await,
        Err(err) => {
            tracing::warn!("Failed to serialize server frame: {err}");
            Ok(())
        }
    }
}

/// Parse and process a single frame from the client.
async fn process_frame(
    text: &str,
    session: &mut Session,
    state: &AppState,
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
) -> Flow {
    let frame = match ClientFrame::parse(text) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::debug!(error = %err, "Rejecting malformed frame");
            return reply(ws_sender, ServerFrame::error(format!("invalid frame: {err}"))).await;
        }
    };

    match frame {
        ClientFrame::Register { .. } => {
            if let Some(id) = &session.client_id {
                return reply(ws_sender, ServerFrame::error(format!("already registered as '{id}'"))).await;
            }
            let Some(request) = frame.into_registration() else {
                return Flow::Continue;
            };
            let (handle, outbound) = ConnectionHandle::channel(state.config.hub.outbound_buffer);
            let connection = handle.id;
            match state.hub.register(handle, request).await {
                // The hub sends the `registered` reply through the new handle.
                Ok(client) => {
                    session.client_id = Some(client.id);
                    session.connection = Some(connection);
                    session.outbound = Some(outbound);
                    Flow::Continue
                }
                Err(HubError::Unavailable) => Flow::Close,
                Err(err) => reply(ws_sender, ServerFrame::error(err.to_string())).await,
            }
        }
        ClientFrame::Envelope { envelope } => {
            match state.hub.submit(envelope, session.client_id.clone(), true).await {
                Ok(_) => Flow::Continue,
                Err(HubError::Unavailable) => Flow::Close,
                Err(err) => reply(ws_sender, ServerFrame::error(err.to_string())).await,
            }
        }
        ClientFrame::Heartbeat => {
            if let Some(id) = &session.client_id {
                if state.hub.heartbeat(id).await.is_err() {
                    return Flow::Close;
                }
            }
            reply(ws_sender, ServerFrame::HeartbeatAck).await
        }
    }
}

async fn reply(ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin), frame: ServerFrame) -> Flow {
    match send_frame(ws_sender, &frame).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Close,
    }
}
