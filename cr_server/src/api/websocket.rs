//! WebSocket handler for real-time lobby updates.
//!
//! A single connection can follow several lobbies at once. Clients subscribe
//! to a lobby's room after joining it over HTTP, then receive every
//! [`LobbyEvent`](cardroom::events::LobbyEvent) published there: roster
//! changes, settings, game state and chat.
//!
//! # Connection Flow
//!
//! 1. Client connects via `GET /ws?token=<jwt_token>`
//! 2. Server validates the JWT and loads the account before upgrading
//! 3. Server spawns a send task that forwards room events and command replies
//! 4. The receive loop parses client commands, rate limited per connection
//! 5. On disconnect the connection is dropped from every room
//!
//! # Client Messages
//!
//! ```json
//! {"type": "join_lobby", "lobby_id": 4}
//! {"type": "leave_lobby", "lobby_id": 4}
//! {"type": "chat", "lobby_id": 4, "text": "good luck"}
//! ```
//!
//! # Server Messages
//!
//! - **Room events**: `{"lobbyId": 4, "event": "player_joined", "data": {...}}`
//! - **Command responses**: `{"type": "success" | "error", "message": "..."}`
//!
//! # Example
//!
//! ```javascript
//! const ws = new WebSocket('ws://localhost:3001/ws?token=eyJhbGc...');
//!
//! ws.onopen = () => ws.send(JSON.stringify({ type: "join_lobby", lobby_id: 4 }));
//! ws.onmessage = (msg) => {
//!   const data = JSON.parse(msg.data);
//!   if (data.event) {
//!     handleLobbyEvent(data);
//!   } else {
//!     handleResponse(data);
//!   }
//! };
//! ```

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use cardroom::{
    auth::User,
    events::{ConnectionId, RoomMessage},
    lobby::LobbyId,
};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{AppState, middleware::authenticate, rate_limiter::ConnectionLimiter};
use crate::metrics;

/// Room events buffered per connection before new ones are dropped
const ROOM_CHANNEL_CAPACITY: usize = 64;

/// Command replies buffered per connection
const RESPONSE_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

/// Client messages received via WebSocket
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    /// Follow a lobby's events. The caller must already be a member.
    JoinLobby { lobby_id: LobbyId },
    /// Stop following a lobby. Membership is unchanged.
    LeaveLobby { lobby_id: LobbyId },
    /// Post a chat line to a lobby
    Chat { lobby_id: LobbyId, text: String },
}

/// Response messages sent to client
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerResponse {
    Success { message: String },
    Error { message: String },
}

impl ServerResponse {
    fn success(message: impl Into<String>) -> Self {
        ServerResponse::Success {
            message: message.into(),
        }
    }

    fn error(message: impl Into<String>) -> Self {
        ServerResponse::Error {
            message: message.into(),
        }
    }
}

/// Upgrade an HTTP connection to a lobby event stream.
///
/// # Query Parameters
///
/// - `token`: JWT access token for authentication
///
/// # Response
///
/// On success, upgrades the connection (101 Switching Protocols).
/// On authentication failure, returns `401 Unauthorized`.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let user = match authenticate(&state, &query.token).await {
        Ok(user) => user,
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// Handle an established WebSocket connection.
async fn handle_socket(socket: WebSocket, user: User, state: AppState) {
    let connection_id = Uuid::new_v4();
    let (mut sender, mut receiver) = socket.split();

    info!("WebSocket connected: connection={connection_id}, user={}", user.id);
    metrics::websocket_connected();

    let mut limiter = ConnectionLimiter::default();
    let (room_tx, mut room_rx) = mpsc::channel::<RoomMessage>(ROOM_CHANNEL_CAPACITY);
    let (response_tx, mut response_rx) = mpsc::channel::<String>(RESPONSE_CHANNEL_CAPACITY);

    let send_task = tokio::spawn(async move {
        loop {
            let json = tokio::select! {
                Some(message) = room_rx.recv() => {
                    metrics::lobby_events_delivered(message.event.name());
                    match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            error!("Failed to serialize {} event: {e}", message.event.name());
                            continue;
                        }
                    }
                }
                Some(response_json) = response_rx.recv() => response_json,
                else => break,
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
            metrics::websocket_messages_sent();
        }
    });

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                metrics::websocket_messages_received();

                let response = match limiter.check() {
                    Err(exceeded) => {
                        warn!(
                            "{} rate limit exceeded for user {} (connection {connection_id})",
                            exceeded.kind.as_str(),
                            user.id
                        );
                        metrics::rate_limit_hits_total(exceeded.kind.as_str());
                        ServerResponse::error(exceeded.message())
                    }
                    Ok(()) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => {
                            handle_client_message(
                                client_msg,
                                connection_id,
                                &user,
                                &room_tx,
                                &state,
                            )
                            .await
                        }
                        Err(e) => {
                            warn!("Failed to parse client message from user {}: {e}", user.id);
                            ServerResponse::error("Invalid message format")
                        }
                    },
                };

                if let Ok(json) = serde_json::to_string(&response)
                    && response_tx.send(json).await.is_err()
                {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                debug!("WebSocket close frame: connection={connection_id}");
                break;
            }
            Err(e) => {
                error!("WebSocket error on connection {connection_id}: {e}");
                break;
            }
            _ => {}
        }
    }

    send_task.abort();
    state.hub.unsubscribe_all(connection_id).await;
    metrics::websocket_disconnected();

    info!(
        "WebSocket disconnected: connection={connection_id}, user={}",
        user.id
    );
}

/// Process a client command and return the reply to send.
async fn handle_client_message(
    msg: ClientMessage,
    connection_id: ConnectionId,
    user: &User,
    room_tx: &mpsc::Sender<RoomMessage>,
    state: &AppState,
) -> ServerResponse {
    match msg {
        ClientMessage::JoinLobby { lobby_id } => {
            if let Err(e) = state.lobby_manager.ensure_member(lobby_id, user.id).await {
                return ServerResponse::error(e.client_message());
            }
            state
                .hub
                .subscribe(lobby_id, connection_id, user.id, room_tx.clone())
                .await;
            ServerResponse::success(format!("Joined lobby {lobby_id}"))
        }

        ClientMessage::LeaveLobby { lobby_id } => {
            if state.hub.unsubscribe(lobby_id, connection_id).await {
                ServerResponse::success(format!("Left lobby {lobby_id}"))
            } else {
                ServerResponse::error(format!("Not subscribed to lobby {lobby_id}"))
            }
        }

        ClientMessage::Chat { lobby_id, text } => {
            // Name and picture may have changed since the socket opened
            let sender = match state.auth_manager.find_user(user.id).await {
                Ok(sender) => sender,
                Err(e) => return ServerResponse::error(e.client_message()),
            };
            match state.lobby_manager.chat(lobby_id, &sender, &text).await {
                Ok(_) => ServerResponse::success("Message sent"),
                Err(e) => ServerResponse::error(e.client_message()),
            }
        }
    }
}
