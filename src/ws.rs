// src/ws.rs
//! Subscribe channel. Frames coming from the client only manage presence and
//! subscriptions; commands go through the HTTP routes.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broadcast::{Event, Room};
use crate::models::{ConnectionId, Participant, Role};
use crate::services::{Session, SharedSession};
use crate::store::Store;

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Join {
        poll_id: Uuid,
        identity: String,
        display_name: String,
        role: Role,
    },
    Leave,
    /// Listen without appearing on the roster. No poll id means every poll.
    Watch { poll_id: Option<Uuid> },
}

pub async fn ws_handler<S: Store>(
    ws: WebSocketUpgrade,
    State(session): State<SharedSession<S>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, session))
}

async fn handle_socket<S: Store>(mut socket: WebSocket, session: SharedSession<S>) {
    let (outlet, mut inbox) = mpsc::unbounded_channel();
    let connection = session.connect(outlet).await;

    loop {
        tokio::select! {
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Err(message) = handle_client_message(&session, connection, text.as_str()).await {
                        session.broadcaster.send_to(connection, Event::Error { message }).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::debug!(%connection, error = %err, "websocket receive failed");
                    break;
                }
            },
            outgoing = inbox.recv() => {
                let Some(event) = outgoing else { break };
                let kicked = matches!(event, Event::StudentKicked { .. });
                if !push(&mut socket, connection, &event).await {
                    break;
                }
                if kicked {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    session.disconnect(connection).await;
}

async fn handle_client_message<S: Store>(
    session: &Session<S>,
    connection: ConnectionId,
    text: &str,
) -> Result<(), String> {
    let message: ClientMessage =
        serde_json::from_str(text).map_err(|err| format!("malformed message: {err}"))?;

    match message {
        ClientMessage::Join {
            poll_id,
            identity,
            display_name,
            role,
        } => {
            let participant = Participant {
                connection_id: connection,
                identity,
                display_name,
                role,
                poll_id,
            };
            session.join(participant).await.map_err(|err| err.to_string())?;
        }
        ClientMessage::Leave => {
            session.leave(connection).await;
        }
        ClientMessage::Watch { poll_id } => {
            let room = poll_id.map_or(Room::Global, Room::Poll);
            session.watch(connection, room).await;
        }
    }
    Ok(())
}

async fn push(socket: &mut WebSocket, connection: ConnectionId, event: &Event) -> bool {
    let frame = match serde_json::to_string(event) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::warn!(%connection, error = %err, "could not encode event");
            return true;
        }
    };
    match socket.send(Message::Text(frame.into())).await {
        Ok(()) => true,
        Err(err) => {
            tracing::warn!(%connection, error = %err, "push failed, closing connection");
            false
        }
    }
}
