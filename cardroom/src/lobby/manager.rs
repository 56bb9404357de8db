//! Lobby manager: membership rules and the events they publish.

use super::{
    errors::{LobbyError, LobbyResult},
    models::{
        CreateLobbyRequest, JoinRequest, LeaveOutcome, LobbyId, LobbyQuery, LobbyRecord,
        LobbySettings, LobbyView, MembershipChange, NewLobby, SettingsUpdate,
    },
};
use crate::auth::{User, UserId, hash_password};
use crate::db::LobbyRepository;
use crate::events::{LobbyEvent, LobbyHub};
use std::sync::Arc;

/// Default and upper bound for players in one lobby
pub const MAX_LOBBY_PLAYERS: usize = 6;

/// Longest accepted lobby name, in characters
pub const MAX_NAME_LEN: usize = 100;

/// Longest accepted chat message, in characters
pub const MAX_CHAT_LEN: usize = 500;

/// What happened when a member left
#[derive(Debug, Clone)]
pub enum LeaveResult {
    /// The host left and the lobby was deleted
    Closed,
    /// The member left; the lobby remains
    Left(LobbyView),
}

/// Lobby manager
pub struct LobbyManager {
    lobbies: Arc<dyn LobbyRepository>,
    hub: Arc<LobbyHub>,
    max_players: usize,
}

impl LobbyManager {
    pub fn new(lobbies: Arc<dyn LobbyRepository>, hub: Arc<LobbyHub>) -> Self {
        Self {
            lobbies,
            hub,
            max_players: MAX_LOBBY_PLAYERS,
        }
    }

    /// Cap lobby size, clamped to `2..=MAX_LOBBY_PLAYERS`.
    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players.clamp(2, MAX_LOBBY_PLAYERS);
        self
    }

    pub fn max_players(&self) -> usize {
        self.max_players
    }

    /// Open a lobby with the caller as host and sole member.
    pub async fn create(&self, host: &User, request: CreateLobbyRequest) -> LobbyResult<LobbyView> {
        if !host.role.can_host() {
            return Err(LobbyError::Forbidden(
                "Only hosts and admins can create lobbies".to_string(),
            ));
        }

        let name = validate_name(&request.name)?;
        let password_hash = match request.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => Some(hash_password(password).map_err(|_| LobbyError::HashingFailed)?),
            None => None,
        };

        let record = self
            .lobbies
            .create_lobby(NewLobby {
                name,
                password_hash,
                expertise_level: request.expertise_level.unwrap_or_default(),
                owner_id: host.id,
            })
            .await?;

        log::info!("User {} opened lobby {} ({})", host.id, record.id, record.name);
        Ok(LobbyView::from(&record))
    }

    pub async fn list(&self, query: &LobbyQuery) -> LobbyResult<Vec<LobbyView>> {
        let records = self.lobbies.list_lobbies(query).await?;
        Ok(records.iter().map(LobbyView::from).collect())
    }

    pub async fn get(&self, lobby_id: LobbyId) -> LobbyResult<LobbyView> {
        Ok(LobbyView::from(&self.find(lobby_id).await?))
    }

    pub async fn find(&self, lobby_id: LobbyId) -> LobbyResult<LobbyRecord> {
        self.lobbies
            .find_lobby(lobby_id)
            .await?
            .ok_or(LobbyError::NotFound)
    }

    /// Lobby record, provided `user_id` is on its roster.
    pub async fn ensure_member(&self, lobby_id: LobbyId, user_id: UserId) -> LobbyResult<LobbyRecord> {
        let record = self.find(lobby_id).await?;
        if !record.is_member(user_id) {
            return Err(LobbyError::NotMember);
        }
        Ok(record)
    }

    /// Join a lobby. Joining again is a no-op and publishes nothing.
    ///
    /// The lock, password and capacity checks run in the store against the
    /// row it is about to rewrite.
    ///
    /// # Errors
    ///
    /// * `LobbyError::NotFound` - No such lobby
    /// * `LobbyError::Locked` - Locked and the caller is not a member
    /// * `LobbyError::IncorrectPassword` - Password missing or wrong
    /// * `LobbyError::Full` - Roster at capacity
    pub async fn join(
        &self,
        lobby_id: LobbyId,
        user: &User,
        password: Option<&str>,
    ) -> LobbyResult<LobbyView> {
        let join = JoinRequest {
            user_id: user.id,
            password,
            capacity: self.max_players,
        };

        let _sequence = self.hub.sequence(lobby_id).await;
        match self.lobbies.add_member(lobby_id, join).await? {
            MembershipChange::Updated(record) => {
                log::info!("User {} joined lobby {lobby_id}", user.id);
                self.hub
                    .publish(
                        lobby_id,
                        LobbyEvent::PlayerJoined {
                            players: record.players.clone(),
                        },
                    )
                    .await;
                Ok(LobbyView::from(&record))
            }
            MembershipChange::Unchanged(record) => Ok(LobbyView::from(&record)),
            MembershipChange::Full => Err(LobbyError::Full {
                max: self.max_players,
            }),
            MembershipChange::Locked => Err(LobbyError::Locked),
            MembershipChange::IncorrectPassword => Err(LobbyError::IncorrectPassword),
            MembershipChange::NotFound => Err(LobbyError::NotFound),
        }
    }

    /// Leave a lobby. When the host leaves, the lobby (and its game) is
    /// deleted and its room closed.
    pub async fn leave(&self, lobby_id: LobbyId, user: &User) -> LobbyResult<LeaveResult> {
        let _sequence = self.hub.sequence(lobby_id).await;
        match self.lobbies.leave_lobby(lobby_id, user.id).await? {
            LeaveOutcome::Closed => {
                log::info!("Host {} left lobby {lobby_id}; lobby closed", user.id);
                self.hub
                    .publish(lobby_id, LobbyEvent::HostLeftLobby { lobby_id })
                    .await;
                self.hub.close_room(lobby_id).await;
                Ok(LeaveResult::Closed)
            }
            LeaveOutcome::Left(record) => {
                log::info!("User {} left lobby {lobby_id}", user.id);
                self.hub.remove_user(lobby_id, user.id).await;
                self.hub
                    .publish(
                        lobby_id,
                        LobbyEvent::PlayerLeft {
                            players: record.players.clone(),
                        },
                    )
                    .await;
                Ok(LeaveResult::Left(LobbyView::from(&record)))
            }
            LeaveOutcome::NotMember => Err(LobbyError::NotMember),
            LeaveOutcome::NotFound => Err(LobbyError::NotFound),
        }
    }

    /// Kick a player. Only the host or an admin may, and never themselves.
    pub async fn remove_player(
        &self,
        lobby_id: LobbyId,
        actor: &User,
        player_id: UserId,
    ) -> LobbyResult<LobbyView> {
        let record = self.find(lobby_id).await?;
        if !record.is_owner(actor.id) && !actor.role.is_admin() {
            return Err(LobbyError::Forbidden(
                "Only the lobby host or an admin can remove players".to_string(),
            ));
        }
        if player_id == actor.id {
            return Err(LobbyError::CannotRemoveSelf);
        }
        if record.is_owner(player_id) {
            return Err(LobbyError::Forbidden(
                "The lobby host cannot be removed".to_string(),
            ));
        }

        let _sequence = self.hub.sequence(lobby_id).await;
        match self.lobbies.remove_member(lobby_id, player_id).await? {
            MembershipChange::Updated(record) => {
                log::info!("User {} removed user {player_id} from lobby {lobby_id}", actor.id);
                self.hub
                    .publish(
                        lobby_id,
                        LobbyEvent::PlayerLeft {
                            players: record.players.clone(),
                        },
                    )
                    .await;
                self.hub
                    .publish(
                        lobby_id,
                        LobbyEvent::RemovedFromLobby {
                            lobby_id,
                            user_id: player_id,
                        },
                    )
                    .await;
                self.hub.remove_user(lobby_id, player_id).await;
                Ok(LobbyView::from(&record))
            }
            MembershipChange::Unchanged(_) => Err(LobbyError::PlayerNotInLobby),
            MembershipChange::NotFound => Err(LobbyError::NotFound),
            other => Err(LobbyError::Corrupt(format!(
                "unexpected removal outcome {other:?}"
            ))),
        }
    }

    /// Rename, (un)set the password, or (un)lock a lobby.
    pub async fn update_settings(
        &self,
        lobby_id: LobbyId,
        actor: &User,
        settings: LobbySettings,
    ) -> LobbyResult<LobbyView> {
        let record = self.find(lobby_id).await?;
        if !record.is_owner(actor.id) && !actor.role.is_admin() {
            return Err(LobbyError::Forbidden(
                "Only the lobby host or an admin can change settings".to_string(),
            ));
        }

        let name = settings.name.as_deref().map(validate_name).transpose()?;
        let password_hash = match settings.password.as_deref() {
            None => None,
            Some("") => Some(None),
            Some(password) => Some(Some(
                hash_password(password).map_err(|_| LobbyError::HashingFailed)?,
            )),
        };
        let update = SettingsUpdate {
            name,
            password_hash,
            locked: settings.locked,
        };

        let _sequence = self.hub.sequence(lobby_id).await;
        let record = self
            .lobbies
            .update_settings(lobby_id, &update)
            .await?
            .ok_or(LobbyError::NotFound)?;

        let view = LobbyView::from(&record);
        self.hub
            .publish(lobby_id, LobbyEvent::LobbyUpdated { lobby: view.clone() })
            .await;
        Ok(view)
    }

    /// Relay a chat line to the lobby room.
    pub async fn chat(&self, lobby_id: LobbyId, user: &User, text: &str) -> LobbyResult<usize> {
        let text = text.trim();
        if text.is_empty() {
            return Err(LobbyError::InvalidMessage("message is empty".to_string()));
        }
        if text.chars().count() > MAX_CHAT_LEN {
            return Err(LobbyError::InvalidMessage(format!(
                "message exceeds {MAX_CHAT_LEN} characters"
            )));
        }
        self.ensure_member(lobby_id, user.id).await?;

        Ok(self
            .hub
            .publish(
                lobby_id,
                LobbyEvent::ChatMessage {
                    user: user.username.clone(),
                    text: text.to_string(),
                    profile_picture: user.profile_picture,
                },
            )
            .await)
    }
}

fn validate_name(name: &str) -> LobbyResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LobbyError::InvalidName("name is required".to_string()));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(LobbyError::InvalidName(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(name.to_string())
}
