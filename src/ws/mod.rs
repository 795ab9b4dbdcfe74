pub mod handlers;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::auth::{AuthError, Authenticator};
use crate::protocol::{ClientMessage, ServerMessage};
use crate::state::{AppState, Outbound};
use crate::types::{ConnectionId, PlayerRecord};

/// Router state for the game socket
#[derive(Clone)]
pub struct Gateway {
    pub state: Arc<AppState>,
    pub authenticator: Arc<dyn Authenticator>,
    /// Time a fresh connection has to authenticate
    pub auth_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
enum HandshakeError {
    #[error("Authentication timed out")]
    Timeout,

    #[error("Expected AUTHENTICATE as the first message")]
    UnexpectedMessage,

    #[error("Connection closed during handshake")]
    Closed,

    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(gateway): State<Gateway>) -> impl IntoResponse {
    tracing::debug!("WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

/// Handle individual WebSocket connection
async fn handle_socket(socket: WebSocket, gateway: Gateway) {
    let (mut sender, mut receiver) = socket.split();

    let player = match authenticate(&mut receiver, &gateway).await {
        Ok(player) => player,
        Err(HandshakeError::Closed) => return,
        Err(e) => {
            tracing::warn!("Rejected connection: {}", e);
            let reply = ServerMessage::Unauthorized {
                reason: e.to_string(),
            };
            send_json(&mut sender, &reply).await;
            let _ = sender.send(Message::Close(None)).await;
            return;
        }
    };

    let state = gateway.state;
    let connection_id: ConnectionId = ulid::Ulid::new().to_string();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();

    // Subscribe before joining so nothing broadcast after the snapshot is missed
    let mut broadcast_rx = state.broadcast.subscribe();

    let Some(welcome) = state.join(&connection_id, player, outbound_tx).await else {
        return;
    };
    if !send_json(&mut sender, &welcome).await {
        tracing::error!("Failed to send welcome message");
        state.handle_disconnect(&connection_id).await;
        return;
    }

    loop {
        tokio::select! {
            broadcast_msg = broadcast_rx.recv() => {
                match broadcast_msg {
                    Ok(envelope) => {
                        if envelope.is_for(&connection_id) && !send_json(&mut sender, &envelope.msg).await {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(connection_id = %connection_id, "Broadcast lagged, skipped {} messages", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }

            outbound = outbound_rx.recv() => {
                match outbound {
                    Some(Outbound::Message(msg)) => {
                        if !send_json(&mut sender, &msg).await {
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        tracing::info!(connection_id = %connection_id, "Closing connection");
                        let _ = sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }

            ws_msg = receiver.next() => {
                match ws_msg {
                    Some(Ok(Message::Text(text))) => {
                        tracing::debug!("Received message: {}", text.as_str());

                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(client_msg) => {
                                if let Some(response) =
                                    handlers::handle_message(client_msg, &connection_id, &state).await
                                {
                                    if !send_json(&mut sender, &response).await {
                                        tracing::error!("Failed to send response");
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::error!("Failed to parse client message: {}", e);
                                let error = ServerMessage::Error {
                                    code: "PARSE_ERROR".to_string(),
                                    msg: format!("Invalid message format: {}", e),
                                };
                                send_json(&mut sender, &error).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        tracing::info!("WebSocket closed");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    state.handle_disconnect(&connection_id).await;
    tracing::info!(connection_id = %connection_id, "WebSocket connection closed");
}

/// Wait for the AUTHENTICATE frame and resolve it to a player
async fn authenticate(
    receiver: &mut SplitStream<WebSocket>,
    gateway: &Gateway,
) -> Result<PlayerRecord, HandshakeError> {
    let first_frame = async {
        loop {
            match receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    return match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Authenticate { token }) => Ok(token),
                        _ => Err(HandshakeError::UnexpectedMessage),
                    };
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    return Err(HandshakeError::Closed)
                }
                // Ping/pong and binary frames don't count
                Some(Ok(_)) => {}
            }
        }
    };

    let token = tokio::time::timeout(gateway.auth_timeout, first_frame)
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    Ok(gateway.authenticator.authenticate(&token).await?)
}

async fn send_json(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            tracing::error!("Failed to serialize message: {}", e);
            true
        }
    }
}
