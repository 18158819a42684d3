use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, warn};

use crate::api::rest::auth::AuthSession;
use crate::directory::Session;
use crate::models::messages::{ClientMessage, ServerMessage};
use crate::state::AppState;

/// The session is verified before the upgrade, so a rejected client never
/// touches the hub.
pub async fn ws_handler(
    AuthSession(session): AuthSession,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state, session))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, session: Session) {
    let (mut sender, mut receiver) = socket.split();
    let (outbox, inbox) = mpsc::unbounded_channel::<ServerMessage>();
    let connection_id = state.hub.register(session, outbox);

    let mut outbound = UnboundedReceiverStream::new(inbox);
    let send_task = tokio::spawn(async move {
        while let Some(message) = outbound.next().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize channel message");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let relay_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(frame)) = receiver.next().await {
            match frame {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        relay_state
                            .relay
                            .handle_client_message(session, message)
                            .await
                    }
                    Err(err) => {
                        debug!(party_id = %session.party_id, error = %err, "malformed channel frame");
                        relay_state.hub.send(
                            session.role,
                            session.party_id,
                            ServerMessage::Error {
                                message: format!("malformed frame: {err}"),
                            },
                        );
                    }
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = send_task => {},
        _ = recv_task => {},
    }

    state.hub.unregister(session, connection_id);
}
