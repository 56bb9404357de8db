//! In-process store used by tests and the server's `--memory` mode.
//!
//! Rows are kept in the same shape as the SQL tables (the roster stays a
//! delimited string) and every trait method runs under one mutex, which
//! gives each call the same all-or-nothing behaviour as a transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::repository::{GameCreate, GameRepository, LobbyRepository, UserRepository};
use crate::auth::{
    AuthResult, NewUser, PlayerStats, PlayerSummary, ProfilePicture, User, UserCredentials,
    UserId, UserWrite,
};
use crate::game::{
    GameCommand, GameError, GameId, GameResult, GameTable, GameTransition, NewGame, Settlement,
};
use crate::lobby::{
    ExpertiseLevel, JoinRequest, LeaveOutcome, LobbyError, LobbyId, LobbyQuery, LobbyRecord, LobbyResult,
    LobbySort, MembershipChange, NewLobby, SettingsUpdate, SortOrder,
};
use crate::roster::Roster;

#[derive(Debug, Clone)]
struct LobbyRow {
    id: LobbyId,
    name: String,
    password_hash: Option<String>,
    expertise_level: ExpertiseLevel,
    owner_id: UserId,
    user_ids: String,
    locked: bool,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct MemoryState {
    users: BTreeMap<UserId, UserCredentials>,
    lobbies: BTreeMap<LobbyId, LobbyRow>,
    games: BTreeMap<GameId, GameTable>,
    next_user_id: UserId,
    next_lobby_id: LobbyId,
    next_game_id: GameId,
}

impl MemoryState {
    fn email_taken(&self, email: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|c| Some(c.user.id) != except && c.user.email.eq_ignore_ascii_case(email))
    }

    fn username_taken(&self, username: &str, except: Option<UserId>) -> bool {
        self.users
            .values()
            .any(|c| Some(c.user.id) != except && c.user.username.eq_ignore_ascii_case(username))
    }

    fn summary(&self, user_id: UserId) -> Option<PlayerSummary> {
        self.users.get(&user_id).map(|c| PlayerSummary {
            id: user_id,
            username: c.user.username.clone(),
        })
    }

    fn stats(&self, user_id: UserId) -> Option<PlayerStats> {
        self.users.get(&user_id).map(|c| stats_of(&c.user))
    }

    fn record(&self, row: &LobbyRow) -> LobbyResult<LobbyRecord> {
        let roster =
            Roster::parse(&row.user_ids).map_err(|e| LobbyError::Corrupt(e.to_string()))?;
        let owner = self
            .summary(row.owner_id)
            .ok_or_else(|| LobbyError::Corrupt(format!("lobby {} has no owner", row.id)))?;
        let players = roster.ids().iter().filter_map(|&id| self.summary(id)).collect();

        Ok(LobbyRecord {
            id: row.id,
            name: row.name.clone(),
            password_hash: row.password_hash.clone(),
            expertise_level: row.expertise_level,
            owner,
            roster,
            players,
            locked: row.locked,
            created_at: row.created_at,
        })
    }

    fn settle(&mut self, settlement: &Settlement) -> Vec<PlayerStats> {
        for result in &settlement.winners {
            if let Some(c) = self.users.get_mut(&result.user_id) {
                c.user.wins += 1;
                c.user.games_played += 1;
            }
        }
        for result in &settlement.losers {
            if let Some(c) = self.users.get_mut(&result.user_id) {
                c.user.losses += 1;
                c.user.games_played += 1;
            }
        }

        settlement
            .winners
            .iter()
            .chain(&settlement.losers)
            .filter_map(|r| self.stats(r.user_id))
            .collect()
    }
}

fn stats_of(user: &User) -> PlayerStats {
    PlayerStats {
        id: user.id,
        username: user.username.clone(),
        wins: user.wins,
        losses: user.losses,
        games_played: user.games_played,
        profile_picture: user.profile_picture,
    }
}

/// Store keeping every table in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepository for MemoryStore {
    async fn create_user(&self, new: NewUser) -> AuthResult<UserWrite> {
        let mut state = self.state.lock().await;
        if state.email_taken(&new.email, None) {
            return Ok(UserWrite::EmailTaken);
        }
        if state.username_taken(&new.username, None) {
            return Ok(UserWrite::UsernameTaken);
        }

        state.next_user_id += 1;
        let user = User {
            id: state.next_user_id,
            username: new.username,
            email: new.email,
            role: new.role,
            wins: 0,
            losses: 0,
            games_played: 0,
            profile_picture: ProfilePicture::Default,
            created_at: Utc::now(),
        };
        state.users.insert(
            user.id,
            UserCredentials {
                user: user.clone(),
                password_hash: new.password_hash,
            },
        );
        Ok(UserWrite::Saved(user))
    }

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>> {
        let state = self.state.lock().await;
        Ok(state.users.get(&user_id).map(|c| c.user.clone()))
    }

    async fn find_credentials(&self, email: &str) -> AuthResult<Option<UserCredentials>> {
        let state = self.state.lock().await;
        Ok(state
            .users
            .values()
            .find(|c| c.user.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn username_exists(&self, username: &str) -> AuthResult<bool> {
        Ok(self.state.lock().await.username_taken(username, None))
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        username: &str,
        email: &str,
    ) -> AuthResult<UserWrite> {
        let mut state = self.state.lock().await;
        if !state.users.contains_key(&user_id) {
            return Ok(UserWrite::NotFound);
        }
        if state.email_taken(email, Some(user_id)) {
            return Ok(UserWrite::EmailTaken);
        }
        if state.username_taken(username, Some(user_id)) {
            return Ok(UserWrite::UsernameTaken);
        }

        let Some(creds) = state.users.get_mut(&user_id) else {
            return Ok(UserWrite::NotFound);
        };
        creds.user.username = username.to_string();
        creds.user.email = email.to_string();
        Ok(UserWrite::Saved(creds.user.clone()))
    }

    async fn update_profile_picture(
        &self,
        user_id: UserId,
        picture: ProfilePicture,
    ) -> AuthResult<Option<User>> {
        let mut state = self.state.lock().await;
        Ok(state.users.get_mut(&user_id).map(|c| {
            c.user.profile_picture = picture;
            c.user.clone()
        }))
    }

    async fn list_stats(&self) -> AuthResult<Vec<PlayerStats>> {
        let state = self.state.lock().await;
        Ok(state.users.values().map(|c| stats_of(&c.user)).collect())
    }
}

#[async_trait]
impl LobbyRepository for MemoryStore {
    async fn create_lobby(&self, lobby: NewLobby) -> LobbyResult<LobbyRecord> {
        let mut state = self.state.lock().await;
        state.next_lobby_id += 1;

        let row = LobbyRow {
            id: state.next_lobby_id,
            name: lobby.name,
            password_hash: lobby.password_hash,
            expertise_level: lobby.expertise_level,
            owner_id: lobby.owner_id,
            user_ids: Roster::with_host(lobby.owner_id).to_string(),
            locked: false,
            created_at: Utc::now(),
        };
        let record = state.record(&row)?;
        state.lobbies.insert(row.id, row);
        Ok(record)
    }

    async fn find_lobby(&self, lobby_id: LobbyId) -> LobbyResult<Option<LobbyRecord>> {
        let state = self.state.lock().await;
        state.lobbies.get(&lobby_id).map(|row| state.record(row)).transpose()
    }

    async fn list_lobbies(&self, query: &LobbyQuery) -> LobbyResult<Vec<LobbyRecord>> {
        let state = self.state.lock().await;

        let mut rows: Vec<&LobbyRow> = state
            .lobbies
            .values()
            .filter(|row| !row.locked && query.password.accepts(row.password_hash.is_some()))
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match query.sort {
                LobbySort::Id => a.id.cmp(&b.id),
                LobbySort::Name => a.name.cmp(&b.name),
                LobbySort::CreatedAt => a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)),
                LobbySort::Expertise => a.expertise_level.as_str().cmp(b.expertise_level.as_str()),
            };
            match query.order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        rows.into_iter().map(|row| state.record(row)).collect()
    }

    async fn add_member(
        &self,
        lobby_id: LobbyId,
        join: JoinRequest<'_>,
    ) -> LobbyResult<MembershipChange> {
        let mut state = self.state.lock().await;
        let Some(row) = state.lobbies.get(&lobby_id).cloned() else {
            return Ok(MembershipChange::NotFound);
        };

        let mut roster =
            Roster::parse(&row.user_ids).map_err(|e| LobbyError::Corrupt(e.to_string()))?;
        if roster.contains(join.user_id) {
            return Ok(MembershipChange::Unchanged(state.record(&row)?));
        }
        if let Some(refusal) = join.refusal(row.locked, row.password_hash.as_deref(), roster.len())
        {
            return Ok(refusal);
        }

        roster.insert(join.user_id);
        let updated = LobbyRow {
            user_ids: roster.to_string(),
            ..row
        };
        let record = state.record(&updated)?;
        state.lobbies.insert(lobby_id, updated);
        Ok(MembershipChange::Updated(record))
    }

    async fn remove_member(
        &self,
        lobby_id: LobbyId,
        user_id: UserId,
    ) -> LobbyResult<MembershipChange> {
        let mut state = self.state.lock().await;
        let Some(row) = state.lobbies.get(&lobby_id).cloned() else {
            return Ok(MembershipChange::NotFound);
        };

        let mut roster =
            Roster::parse(&row.user_ids).map_err(|e| LobbyError::Corrupt(e.to_string()))?;
        if !roster.remove(user_id) {
            return Ok(MembershipChange::Unchanged(state.record(&row)?));
        }

        let updated = LobbyRow {
            user_ids: roster.to_string(),
            ..row
        };
        let record = state.record(&updated)?;
        state.lobbies.insert(lobby_id, updated);
        Ok(MembershipChange::Updated(record))
    }

    async fn leave_lobby(&self, lobby_id: LobbyId, user_id: UserId) -> LobbyResult<LeaveOutcome> {
        let mut state = self.state.lock().await;
        let Some(row) = state.lobbies.get(&lobby_id).cloned() else {
            return Ok(LeaveOutcome::NotFound);
        };

        if row.owner_id == user_id {
            state.lobbies.remove(&lobby_id);
            state.games.retain(|_, game| game.lobby_id != lobby_id);
            return Ok(LeaveOutcome::Closed);
        }

        let mut roster =
            Roster::parse(&row.user_ids).map_err(|e| LobbyError::Corrupt(e.to_string()))?;
        if !roster.remove(user_id) {
            return Ok(LeaveOutcome::NotMember);
        }

        let updated = LobbyRow {
            user_ids: roster.to_string(),
            ..row
        };
        let record = state.record(&updated)?;
        state.lobbies.insert(lobby_id, updated);
        Ok(LeaveOutcome::Left(record))
    }

    async fn update_settings(
        &self,
        lobby_id: LobbyId,
        update: &SettingsUpdate,
    ) -> LobbyResult<Option<LobbyRecord>> {
        let mut state = self.state.lock().await;
        let Some(row) = state.lobbies.get_mut(&lobby_id) else {
            return Ok(None);
        };

        if let Some(name) = &update.name {
            row.name = name.clone();
        }
        if let Some(password_hash) = &update.password_hash {
            row.password_hash = password_hash.clone();
        }
        if let Some(locked) = update.locked {
            row.locked = locked;
        }

        let row = row.clone();
        state.record(&row).map(Some)
    }
}

#[async_trait]
impl GameRepository for MemoryStore {
    async fn create_game(
        &self,
        game: NewGame,
        rng: &mut (dyn RngCore + Send),
    ) -> GameResult<GameCreate> {
        let mut state = self.state.lock().await;
        let Some(row) = state.lobbies.get(&game.lobby_id) else {
            return Err(GameError::LobbyNotFound);
        };
        let roster = Roster::parse(&row.user_ids).map_err(|e| GameError::Corrupt(e.to_string()))?;
        if let Some(existing) = state.games.values().find(|g| g.lobby_id == game.lobby_id) {
            return Ok(GameCreate::AlreadyRunning(existing.id));
        }
        let seats = game.deal(roster.ids(), rng)?;

        state.next_game_id += 1;
        let table = GameTable::new(state.next_game_id, game.lobby_id, seats);
        state.games.insert(table.id, table.clone());
        Ok(GameCreate::Created(table))
    }

    async fn find_game(&self, game_id: GameId) -> GameResult<Option<GameTable>> {
        Ok(self.state.lock().await.games.get(&game_id).cloned())
    }

    async fn find_game_for_lobby(&self, lobby_id: LobbyId) -> GameResult<Option<GameTable>> {
        let state = self.state.lock().await;
        Ok(state.games.values().find(|g| g.lobby_id == lobby_id).cloned())
    }

    async fn apply(
        &self,
        game_id: GameId,
        command: GameCommand,
        rng: &mut (dyn RngCore + Send),
    ) -> GameResult<GameTransition> {
        let mut state = self.state.lock().await;
        let mut table = state
            .games
            .get(&game_id)
            .cloned()
            .ok_or(GameError::GameNotFound)?;

        // Work on a copy so a rejected command leaves the stored game untouched.
        let status = table.apply(command, rng)?;
        let standings = match status.settlement() {
            Some(settlement) => state.settle(settlement),
            None => Vec::new(),
        };
        state.games.insert(game_id, table.clone());

        Ok(GameTransition {
            table,
            status,
            standings,
        })
    }
}
