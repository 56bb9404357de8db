//! Repository trait definitions for testability and dependency injection.
//!
//! Every method that changes more than one row is atomic: the PostgreSQL
//! store wraps it in a transaction with the affected rows locked
//! `FOR UPDATE`, the in-memory store holds its single lock for the whole call.

use async_trait::async_trait;
use rand::RngCore;

use crate::auth::{
    AuthResult, NewUser, PlayerStats, ProfilePicture, User, UserCredentials, UserId, UserWrite,
};
use crate::game::{GameCommand, GameId, GameResult, GameTable, GameTransition, NewGame};
use crate::lobby::{
    JoinRequest, LeaveOutcome, LobbyId, LobbyQuery, LobbyRecord, LobbyResult, MembershipChange,
    NewLobby, SettingsUpdate,
};

/// Trait for account storage
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Insert a user unless the email or username is taken (email checked first).
    async fn create_user(&self, user: NewUser) -> AuthResult<UserWrite>;

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>>;

    /// Look up a user and password hash by (case-insensitive) email.
    async fn find_credentials(&self, email: &str) -> AuthResult<Option<UserCredentials>>;

    async fn username_exists(&self, username: &str) -> AuthResult<bool>;

    /// Change username and email, keeping both unique across other users.
    async fn update_profile(
        &self,
        user_id: UserId,
        username: &str,
        email: &str,
    ) -> AuthResult<UserWrite>;

    async fn update_profile_picture(
        &self,
        user_id: UserId,
        picture: ProfilePicture,
    ) -> AuthResult<Option<User>>;

    /// Every user's public stats, ordered by id.
    async fn list_stats(&self) -> AuthResult<Vec<PlayerStats>>;
}

/// Trait for lobby storage and roster mutation
#[async_trait]
pub trait LobbyRepository: Send + Sync {
    /// Insert a lobby whose roster holds only its owner.
    async fn create_lobby(&self, lobby: NewLobby) -> LobbyResult<LobbyRecord>;

    async fn find_lobby(&self, lobby_id: LobbyId) -> LobbyResult<Option<LobbyRecord>>;

    /// Unlocked lobbies matching the query.
    async fn list_lobbies(&self, query: &LobbyQuery) -> LobbyResult<Vec<LobbyRecord>>;

    /// Add a member. A non-member is refused, as decided by
    /// [`JoinRequest::refusal`] on the locked row, when the lobby is
    /// locked, the password does not match, or the roster is full.
    async fn add_member(
        &self,
        lobby_id: LobbyId,
        join: JoinRequest<'_>,
    ) -> LobbyResult<MembershipChange>;

    /// Drop a member from the roster.
    async fn remove_member(&self, lobby_id: LobbyId, user_id: UserId)
    -> LobbyResult<MembershipChange>;

    /// Drop a member; if it is the owner, delete the lobby and its game.
    async fn leave_lobby(&self, lobby_id: LobbyId, user_id: UserId) -> LobbyResult<LeaveOutcome>;

    async fn update_settings(
        &self,
        lobby_id: LobbyId,
        update: &SettingsUpdate,
    ) -> LobbyResult<Option<LobbyRecord>>;
}

/// Outcome of creating a game
#[derive(Debug, Clone)]
pub enum GameCreate {
    Created(GameTable),
    /// The lobby already has a game
    AlreadyRunning(GameId),
}

/// Trait for game storage
#[async_trait]
pub trait GameRepository: Send + Sync {
    /// Insert a game unless the lobby already has one, seating the roster
    /// read under the same lock through [`NewGame::deal`].
    async fn create_game(
        &self,
        game: NewGame,
        rng: &mut (dyn RngCore + Send),
    ) -> GameResult<GameCreate>;

    async fn find_game(&self, game_id: GameId) -> GameResult<Option<GameTable>>;

    async fn find_game_for_lobby(&self, lobby_id: LobbyId) -> GameResult<Option<GameTable>>;

    /// Load the game under lock, apply `command` through
    /// [`GameTable::apply`], persist the new state and, on settlement, the
    /// players' win/loss counts, then commit.
    async fn apply(
        &self,
        game_id: GameId,
        command: GameCommand,
        rng: &mut (dyn RngCore + Send),
    ) -> GameResult<GameTransition>;
}
