//! Lobby rooms and real-time event fan-out.
//!
//! Each lobby is a room. A connection joins a room by handing the hub a
//! bounded sender; [`LobbyHub::publish`] pushes a [`RoomMessage`] to every
//! sender in the room without awaiting, so one slow client cannot stall the
//! others.
//!
//! Managers that change a lobby hold [`LobbyHub::sequence`] for that lobby
//! across the store write and the publish, so a room sees its events in
//! the order the writes committed.

use crate::auth::{PlayerStats, PlayerSummary, ProfilePicture, UserId};
use crate::game::{GameStateView, PlayerResult};
use crate::lobby::{LobbyId, LobbyView};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedMutexGuard, RwLock, mpsc};
use uuid::Uuid;

/// Identifies one WebSocket connection
pub type ConnectionId = Uuid;

/// Event broadcast to a lobby room, serialized as `{"event": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum LobbyEvent {
    PlayerJoined {
        players: Vec<PlayerSummary>,
    },
    PlayerLeft {
        players: Vec<PlayerSummary>,
    },
    #[serde(rename_all = "camelCase")]
    HostLeftLobby {
        lobby_id: LobbyId,
    },
    #[serde(rename_all = "camelCase")]
    RemovedFromLobby {
        lobby_id: LobbyId,
        user_id: UserId,
    },
    LobbyUpdated {
        lobby: LobbyView,
    },
    GameStarted(GameStateView),
    GameStateUpdated(GameStateView),
    #[serde(rename_all = "camelCase")]
    GameEnded {
        winners: Vec<PlayerResult>,
        losers: Vec<PlayerResult>,
        updated_players: Vec<PlayerStats>,
        new_game_state: GameStateView,
    },
    #[serde(rename_all = "camelCase")]
    ChatMessage {
        user: String,
        text: String,
        profile_picture: ProfilePicture,
    },
}

impl LobbyEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            LobbyEvent::PlayerJoined { .. } => "player_joined",
            LobbyEvent::PlayerLeft { .. } => "player_left",
            LobbyEvent::HostLeftLobby { .. } => "host_left_lobby",
            LobbyEvent::RemovedFromLobby { .. } => "removed_from_lobby",
            LobbyEvent::LobbyUpdated { .. } => "lobby_updated",
            LobbyEvent::GameStarted(_) => "game_started",
            LobbyEvent::GameStateUpdated(_) => "game_state_updated",
            LobbyEvent::GameEnded { .. } => "game_ended",
            LobbyEvent::ChatMessage { .. } => "chat_message",
        }
    }
}

/// An event tagged with the room it was published to.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomMessage {
    pub lobby_id: LobbyId,
    #[serde(flatten)]
    pub event: LobbyEvent,
}

#[derive(Debug)]
struct Subscriber {
    user_id: UserId,
    sender: mpsc::Sender<RoomMessage>,
}

/// Room registry shared by the managers and the WebSocket layer.
#[derive(Debug, Default)]
pub struct LobbyHub {
    rooms: RwLock<HashMap<LobbyId, HashMap<ConnectionId, Subscriber>>>,
    sections: Mutex<HashMap<LobbyId, Arc<tokio::sync::Mutex<()>>>>,
}

impl LobbyHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of a lobby's write-then-publish section.
    ///
    /// Hold the guard until the event for the write has been published.
    pub async fn sequence(&self, lobby_id: LobbyId) -> OwnedMutexGuard<()> {
        let section = {
            let mut sections = self.sections.lock().unwrap_or_else(PoisonError::into_inner);
            sections.entry(lobby_id).or_default().clone()
        };
        section.lock_owned().await
    }

    /// Add a connection to a room. Re-subscribing replaces the sender.
    pub async fn subscribe(
        &self,
        lobby_id: LobbyId,
        connection_id: ConnectionId,
        user_id: UserId,
        sender: mpsc::Sender<RoomMessage>,
    ) {
        let mut rooms = self.rooms.write().await;
        rooms
            .entry(lobby_id)
            .or_default()
            .insert(connection_id, Subscriber { user_id, sender });
        log::debug!("Connection {connection_id} (user {user_id}) joined room {lobby_id}");
    }

    /// Remove a connection from one room. Returns whether it was there.
    pub async fn unsubscribe(&self, lobby_id: LobbyId, connection_id: ConnectionId) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&lobby_id) else {
            return false;
        };
        let removed = room.remove(&connection_id).is_some();
        if room.is_empty() {
            rooms.remove(&lobby_id);
        }
        removed
    }

    /// Remove a connection from every room (on disconnect).
    pub async fn unsubscribe_all(&self, connection_id: ConnectionId) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, room| {
            room.remove(&connection_id);
            !room.is_empty()
        });
    }

    /// Drop every connection of `user_id` from a room. Returns how many.
    pub async fn remove_user(&self, lobby_id: LobbyId, user_id: UserId) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&lobby_id) else {
            return 0;
        };
        let before = room.len();
        room.retain(|_, sub| sub.user_id != user_id);
        let removed = before - room.len();
        if room.is_empty() {
            rooms.remove(&lobby_id);
        }
        removed
    }

    /// Forget a room entirely (lobby deleted).
    pub async fn close_room(&self, lobby_id: LobbyId) {
        if let Some(room) = self.rooms.write().await.remove(&lobby_id) {
            log::debug!("Closed room {lobby_id} with {} subscriber(s)", room.len());
        }
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&lobby_id);
    }

    /// Deliver an event to every subscriber of a room. Returns the number of
    /// subscribers that accepted it.
    ///
    /// A full channel drops the event for that subscriber only; a closed
    /// channel removes the subscriber.
    pub async fn publish(&self, lobby_id: LobbyId, event: LobbyEvent) -> usize {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(&lobby_id) else {
            return 0;
        };

        let message = RoomMessage { lobby_id, event };
        let mut delivered = 0;
        room.retain(|connection_id, sub| match sub.sender.try_send(message.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                log::warn!(
                    "Connection {connection_id} channel full, dropping {} for room {lobby_id}",
                    message.event.name()
                );
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                log::debug!("Connection {connection_id} disconnected, removing from room {lobby_id}");
                false
            }
        });

        if room.is_empty() {
            rooms.remove(&lobby_id);
        }
        delivered
    }

    /// Number of connections in a room.
    pub async fn room_size(&self, lobby_id: LobbyId) -> usize {
        self.rooms
            .read()
            .await
            .get(&lobby_id)
            .map_or(0, HashMap::len)
    }

    pub async fn is_subscribed(&self, lobby_id: LobbyId, connection_id: ConnectionId) -> bool {
        self.rooms
            .read()
            .await
            .get(&lobby_id)
            .is_some_and(|room| room.contains_key(&connection_id))
    }
}
