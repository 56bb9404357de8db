//! PostgreSQL implementation of the repository traits.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::RngCore;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use std::collections::HashMap;

use super::repository::{GameCreate, GameRepository, LobbyRepository, UserRepository};
use crate::auth::{
    AuthResult, NewUser, PlayerStats, PlayerSummary, ProfilePicture, User, UserCredentials,
    UserId, UserWrite,
};
use crate::cards::Hand;
use crate::game::{
    GameCommand, GameError, GameId, GameResult, GameTable, GameTransition, NewGame, SeatState,
};
use crate::lobby::{
    ExpertiseLevel, JoinRequest, LeaveOutcome, LobbyId, LobbyQuery, LobbyRecord, LobbyResult,
    MembershipChange, NewLobby, PasswordFilter, SettingsUpdate,
};
use crate::roster::Roster;

const USER_COLUMNS: &str =
    "user_id, username, email, role, wins, losses, games_played, profile_picture, created_at";

const LOBBY_SELECT: &str = r#"
    SELECT l.lobby_id, l.lobby_name, l.lobby_password, l.expertise_level, l.lobby_owner,
           u.username AS owner_username, l.user_ids, l.locked, l.created_at
    FROM lobbies l
    JOIN users u ON u.user_id = l.lobby_owner
"#;

/// Store backed by a PostgreSQL pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn decode_error(message: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(message.to_string().into())
}

fn user_from_row(row: &PgRow) -> Result<User, sqlx::Error> {
    let role: String = row.try_get("role")?;
    let picture: String = row.try_get("profile_picture")?;
    Ok(User {
        id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        email: row.try_get("email")?,
        role: role.parse().map_err(decode_error)?,
        wins: row.try_get("wins")?,
        losses: row.try_get("losses")?,
        games_played: row.try_get("games_played")?,
        profile_picture: picture.parse().map_err(decode_error)?,
        created_at: row.try_get("created_at")?,
    })
}

fn stats_from_row(row: &PgRow) -> Result<PlayerStats, sqlx::Error> {
    let picture: String = row.try_get("profile_picture")?;
    Ok(PlayerStats {
        id: row.try_get("user_id")?,
        username: row.try_get("username")?,
        wins: row.try_get("wins")?,
        losses: row.try_get("losses")?,
        games_played: row.try_get("games_played")?,
        profile_picture: picture.parse().map_err(decode_error)?,
    })
}

/// Lobby columns before the roster is resolved to usernames.
struct LobbyRow {
    id: LobbyId,
    name: String,
    password_hash: Option<String>,
    expertise_level: ExpertiseLevel,
    owner: PlayerSummary,
    roster: Roster,
    locked: bool,
    created_at: DateTime<Utc>,
}

impl LobbyRow {
    fn decode(row: &PgRow) -> Result<Self, sqlx::Error> {
        let expertise: String = row.try_get("expertise_level")?;
        let user_ids: String = row.try_get("user_ids")?;
        Ok(Self {
            id: row.try_get("lobby_id")?,
            name: row.try_get("lobby_name")?,
            password_hash: row.try_get("lobby_password")?,
            expertise_level: expertise.parse().map_err(decode_error)?,
            owner: PlayerSummary {
                id: row.try_get("lobby_owner")?,
                username: row.try_get("owner_username")?,
            },
            roster: Roster::parse(&user_ids).map_err(decode_error)?,
            locked: row.try_get("locked")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_record(self, names: &HashMap<UserId, String>) -> LobbyRecord {
        let players = self
            .roster
            .ids()
            .iter()
            .filter_map(|id| {
                names.get(id).map(|username| PlayerSummary {
                    id: *id,
                    username: username.clone(),
                })
            })
            .collect();

        LobbyRecord {
            id: self.id,
            name: self.name,
            password_hash: self.password_hash,
            expertise_level: self.expertise_level,
            owner: self.owner,
            roster: self.roster,
            players,
            locked: self.locked,
            created_at: self.created_at,
        }
    }
}

async fn usernames(
    conn: &mut PgConnection,
    ids: &[UserId],
) -> Result<HashMap<UserId, String>, sqlx::Error> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query("SELECT user_id, username FROM users WHERE user_id = ANY($1)")
        .bind(ids)
        .fetch_all(&mut *conn)
        .await?;

    rows.iter()
        .map(|row| -> Result<(UserId, String), sqlx::Error> {
            Ok((row.try_get("user_id")?, row.try_get("username")?))
        })
        .collect()
}

async fn hydrate(conn: &mut PgConnection, row: LobbyRow) -> Result<LobbyRecord, sqlx::Error> {
    let names = usernames(conn, row.roster.ids()).await?;
    Ok(row.into_record(&names))
}

async fn fetch_lobby(
    conn: &mut PgConnection,
    lobby_id: LobbyId,
    for_update: bool,
) -> Result<Option<LobbyRow>, sqlx::Error> {
    let sql = if for_update {
        format!("{LOBBY_SELECT} WHERE l.lobby_id = $1 FOR UPDATE OF l")
    } else {
        format!("{LOBBY_SELECT} WHERE l.lobby_id = $1")
    };

    sqlx::query(&sql)
        .bind(lobby_id)
        .fetch_optional(&mut *conn)
        .await?
        .as_ref()
        .map(LobbyRow::decode)
        .transpose()
}

async fn write_roster(
    conn: &mut PgConnection,
    lobby_id: LobbyId,
    roster: &Roster,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE lobbies SET user_ids = $1 WHERE lobby_id = $2")
        .bind(roster.to_string())
        .bind(lobby_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

async fn load_game(
    conn: &mut PgConnection,
    filter: &str,
    key: i64,
    for_update: bool,
) -> Result<Option<GameTable>, sqlx::Error> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!(
        "SELECT game_id, lobby_id, current_round, current_player_turn, pot_amount \
         FROM game_state WHERE {filter} = $1{lock}"
    );

    let Some(row) = sqlx::query(&sql)
        .bind(key)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };
    let game_id: GameId = row.try_get("game_id")?;

    let seats = sqlx::query(
        r#"
        SELECT user_id, seat_position, cards, money, is_active, stepped_back, done_turn
        FROM game_players
        WHERE game_id = $1
        ORDER BY seat_position
        "#,
    )
    .bind(game_id)
    .fetch_all(&mut *conn)
    .await?
    .iter()
    .map(|seat| {
        let cards: String = seat.try_get("cards")?;
        Ok(SeatState {
            user_id: seat.try_get("user_id")?,
            seat: seat.try_get("seat_position")?,
            hand: Hand::parse(&cards).map_err(decode_error)?,
            money: seat.try_get("money")?,
            is_active: seat.try_get("is_active")?,
            stepped_back: seat.try_get("stepped_back")?,
            done_turn: seat.try_get("done_turn")?,
        })
    })
    .collect::<Result<Vec<_>, sqlx::Error>>()?;

    Ok(Some(GameTable::restore(
        game_id,
        row.try_get("lobby_id")?,
        row.try_get("current_round")?,
        row.try_get("current_player_turn")?,
        row.try_get("pot_amount")?,
        seats,
    )))
}

async fn save_game(conn: &mut PgConnection, table: &GameTable) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE game_state
        SET current_round = $1, current_player_turn = $2, pot_amount = $3
        WHERE game_id = $4
        "#,
    )
    .bind(table.current_round)
    .bind(table.current_turn)
    .bind(table.pot_amount)
    .bind(table.id)
    .execute(&mut *conn)
    .await?;

    for seat in &table.players {
        sqlx::query(
            r#"
            UPDATE game_players
            SET cards = $1, money = $2, is_active = $3, stepped_back = $4, done_turn = $5
            WHERE game_id = $6 AND user_id = $7
            "#,
        )
        .bind(seat.hand.to_string())
        .bind(seat.money)
        .bind(seat.is_active)
        .bind(seat.stepped_back)
        .bind(seat.done_turn)
        .bind(table.id)
        .bind(seat.user_id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl UserRepository for PgStore {
    async fn create_user(&self, new: NewUser) -> AuthResult<UserWrite> {
        let mut tx = self.pool.begin().await?;

        let email_taken = sqlx::query("SELECT 1 FROM users WHERE LOWER(email) = LOWER($1)")
            .bind(&new.email)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if email_taken {
            return Ok(UserWrite::EmailTaken);
        }

        let username_taken =
            sqlx::query("SELECT 1 FROM users WHERE LOWER(username) = LOWER($1)")
                .bind(&new.username)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();
        if username_taken {
            return Ok(UserWrite::UsernameTaken);
        }

        let row = sqlx::query(&format!(
            "INSERT INTO users (username, email, password, role) VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        ))
        .bind(&new.username)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.role.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let user = user_from_row(&row)?;

        tx.commit().await?;
        Ok(UserWrite::Saved(user))
    }

    async fn find_by_id(&self, user_id: UserId) -> AuthResult<Option<User>> {
        let row = sqlx::query(&format!("SELECT {USER_COLUMNS} FROM users WHERE user_id = $1"))
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn find_credentials(&self, email: &str) -> AuthResult<Option<UserCredentials>> {
        let row = sqlx::query(&format!(
            "SELECT {USER_COLUMNS}, password FROM users WHERE LOWER(email) = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(UserCredentials {
            user: user_from_row(&row)?,
            password_hash: row.try_get("password")?,
        }))
    }

    async fn username_exists(&self, username: &str) -> AuthResult<bool> {
        let row = sqlx::query("SELECT 1 FROM users WHERE LOWER(username) = LOWER($1)")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    async fn update_profile(
        &self,
        user_id: UserId,
        username: &str,
        email: &str,
    ) -> AuthResult<UserWrite> {
        let mut tx = self.pool.begin().await?;

        let exists = sqlx::query("SELECT 1 FROM users WHERE user_id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();
        if !exists {
            return Ok(UserWrite::NotFound);
        }

        let email_taken = sqlx::query(
            "SELECT 1 FROM users WHERE LOWER(email) = LOWER($1) AND user_id <> $2",
        )
        .bind(email)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
        if email_taken {
            return Ok(UserWrite::EmailTaken);
        }

        let username_taken = sqlx::query(
            "SELECT 1 FROM users WHERE LOWER(username) = LOWER($1) AND user_id <> $2",
        )
        .bind(username)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        .is_some();
        if username_taken {
            return Ok(UserWrite::UsernameTaken);
        }

        let row = sqlx::query(&format!(
            "UPDATE users SET username = $1, email = $2 WHERE user_id = $3 RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(email)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;
        let user = user_from_row(&row)?;

        tx.commit().await?;
        Ok(UserWrite::Saved(user))
    }

    async fn update_profile_picture(
        &self,
        user_id: UserId,
        picture: ProfilePicture,
    ) -> AuthResult<Option<User>> {
        let row = sqlx::query(&format!(
            "UPDATE users SET profile_picture = $1 WHERE user_id = $2 RETURNING {USER_COLUMNS}"
        ))
        .bind(picture.as_str())
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    async fn list_stats(&self) -> AuthResult<Vec<PlayerStats>> {
        let rows = sqlx::query(
            "SELECT user_id, username, wins, losses, games_played, profile_picture \
             FROM users ORDER BY user_id",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(stats_from_row)
            .collect::<Result<Vec<_>, _>>()?)
    }
}

#[async_trait]
impl LobbyRepository for PgStore {
    async fn create_lobby(&self, lobby: NewLobby) -> LobbyResult<LobbyRecord> {
        let mut tx = self.pool.begin().await?;

        let lobby_id: LobbyId = sqlx::query(
            r#"
            INSERT INTO lobbies (lobby_name, lobby_password, expertise_level, lobby_owner, user_ids)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING lobby_id
            "#,
        )
        .bind(&lobby.name)
        .bind(&lobby.password_hash)
        .bind(lobby.expertise_level.as_str())
        .bind(lobby.owner_id)
        .bind(Roster::with_host(lobby.owner_id).to_string())
        .fetch_one(&mut *tx)
        .await?
        .try_get("lobby_id")?;

        let row = fetch_lobby(&mut tx, lobby_id, false)
            .await?
            .ok_or_else(|| decode_error(format!("lobby {lobby_id} vanished after insert")))?;
        let record = hydrate(&mut tx, row).await?;

        tx.commit().await?;
        Ok(record)
    }

    async fn find_lobby(&self, lobby_id: LobbyId) -> LobbyResult<Option<LobbyRecord>> {
        let mut conn = self.pool.acquire().await?;
        let Some(row) = fetch_lobby(&mut conn, lobby_id, false).await? else {
            return Ok(None);
        };
        Ok(Some(hydrate(&mut conn, row).await?))
    }

    async fn list_lobbies(&self, query: &LobbyQuery) -> LobbyResult<Vec<LobbyRecord>> {
        let password_clause = match query.password {
            PasswordFilter::All => "",
            PasswordFilter::Yes => " AND l.lobby_password IS NOT NULL",
            PasswordFilter::No => " AND l.lobby_password IS NULL",
        };
        let order = query.order.keyword();
        let sql = format!(
            "{LOBBY_SELECT} WHERE NOT l.locked{password_clause} ORDER BY {} {order}, l.lobby_id {order}",
            query.sort.column()
        );

        let mut conn = self.pool.acquire().await?;
        let rows = sqlx::query(&sql)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(LobbyRow::decode)
            .collect::<Result<Vec<_>, _>>()?;

        let mut ids: Vec<UserId> = rows.iter().flat_map(|r| r.roster.ids().to_vec()).collect();
        ids.sort_unstable();
        ids.dedup();
        let names = usernames(&mut conn, &ids).await?;

        Ok(rows.into_iter().map(|row| row.into_record(&names)).collect())
    }

    async fn add_member(
        &self,
        lobby_id: LobbyId,
        join: JoinRequest<'_>,
    ) -> LobbyResult<MembershipChange> {
        let mut tx = self.pool.begin().await?;

        let Some(mut row) = fetch_lobby(&mut tx, lobby_id, true).await? else {
            return Ok(MembershipChange::NotFound);
        };
        if row.roster.contains(join.user_id) {
            return Ok(MembershipChange::Unchanged(hydrate(&mut tx, row).await?));
        }
        if let Some(refusal) =
            join.refusal(row.locked, row.password_hash.as_deref(), row.roster.len())
        {
            return Ok(refusal);
        }

        row.roster.insert(join.user_id);
        write_roster(&mut tx, lobby_id, &row.roster).await?;
        let record = hydrate(&mut tx, row).await?;

        tx.commit().await?;
        Ok(MembershipChange::Updated(record))
    }

    async fn remove_member(
        &self,
        lobby_id: LobbyId,
        user_id: UserId,
    ) -> LobbyResult<MembershipChange> {
        let mut tx = self.pool.begin().await?;

        let Some(mut row) = fetch_lobby(&mut tx, lobby_id, true).await? else {
            return Ok(MembershipChange::NotFound);
        };
        if !row.roster.remove(user_id) {
            return Ok(MembershipChange::Unchanged(hydrate(&mut tx, row).await?));
        }

        write_roster(&mut tx, lobby_id, &row.roster).await?;
        let record = hydrate(&mut tx, row).await?;

        tx.commit().await?;
        Ok(MembershipChange::Updated(record))
    }

    async fn leave_lobby(&self, lobby_id: LobbyId, user_id: UserId) -> LobbyResult<LeaveOutcome> {
        let mut tx = self.pool.begin().await?;

        let Some(mut row) = fetch_lobby(&mut tx, lobby_id, true).await? else {
            return Ok(LeaveOutcome::NotFound);
        };

        if row.owner.id == user_id {
            // game_state and game_players cascade
            sqlx::query("DELETE FROM lobbies WHERE lobby_id = $1")
                .bind(lobby_id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(LeaveOutcome::Closed);
        }

        if !row.roster.remove(user_id) {
            return Ok(LeaveOutcome::NotMember);
        }

        write_roster(&mut tx, lobby_id, &row.roster).await?;
        let record = hydrate(&mut tx, row).await?;

        tx.commit().await?;
        Ok(LeaveOutcome::Left(record))
    }

    async fn update_settings(
        &self,
        lobby_id: LobbyId,
        update: &SettingsUpdate,
    ) -> LobbyResult<Option<LobbyRecord>> {
        let mut tx = self.pool.begin().await?;

        let changed = sqlx::query(
            r#"
            UPDATE lobbies
            SET lobby_name = COALESCE($1, lobby_name),
                lobby_password = CASE WHEN $2 THEN $3 ELSE lobby_password END,
                locked = COALESCE($4, locked)
            WHERE lobby_id = $5
            "#,
        )
        .bind(&update.name)
        .bind(update.password_hash.is_some())
        .bind(update.password_hash.clone().flatten())
        .bind(update.locked)
        .bind(lobby_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if changed == 0 {
            return Ok(None);
        }

        let Some(row) = fetch_lobby(&mut tx, lobby_id, false).await? else {
            return Ok(None);
        };
        let record = hydrate(&mut tx, row).await?;

        tx.commit().await?;
        Ok(Some(record))
    }
}

#[async_trait]
impl GameRepository for PgStore {
    async fn create_game(
        &self,
        game: NewGame,
        rng: &mut (dyn RngCore + Send),
    ) -> GameResult<GameCreate> {
        let mut tx = self.pool.begin().await?;

        // The lobby row stays locked until commit, so the roster cannot
        // change between seating and insert, and concurrent starts serialize.
        let lobby = fetch_lobby(&mut tx, game.lobby_id, true)
            .await?
            .ok_or(GameError::LobbyNotFound)?;

        if let Some(existing) = sqlx::query("SELECT game_id FROM game_state WHERE lobby_id = $1")
            .bind(game.lobby_id)
            .fetch_optional(&mut *tx)
            .await?
        {
            return Ok(GameCreate::AlreadyRunning(existing.try_get("game_id")?));
        }

        let seats = game.deal(lobby.roster.ids(), rng)?;
        let mut table = GameTable::new(0, game.lobby_id, seats);
        table.id = sqlx::query(
            r#"
            INSERT INTO game_state (lobby_id, current_round, current_player_turn, pot_amount)
            VALUES ($1, $2, $3, $4)
            RETURNING game_id
            "#,
        )
        .bind(table.lobby_id)
        .bind(table.current_round)
        .bind(table.current_turn)
        .bind(table.pot_amount)
        .fetch_one(&mut *tx)
        .await?
        .try_get("game_id")?;

        for seat in &table.players {
            sqlx::query(
                r#"
                INSERT INTO game_players
                    (game_id, user_id, seat_position, cards, money, is_active, stepped_back, done_turn)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(table.id)
            .bind(seat.user_id)
            .bind(seat.seat)
            .bind(seat.hand.to_string())
            .bind(seat.money)
            .bind(seat.is_active)
            .bind(seat.stepped_back)
            .bind(seat.done_turn)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(GameCreate::Created(table))
    }

    async fn find_game(&self, game_id: GameId) -> GameResult<Option<GameTable>> {
        let mut conn = self.pool.acquire().await?;
        Ok(load_game(&mut conn, "game_id", game_id, false).await?)
    }

    async fn find_game_for_lobby(&self, lobby_id: LobbyId) -> GameResult<Option<GameTable>> {
        let mut conn = self.pool.acquire().await?;
        Ok(load_game(&mut conn, "lobby_id", lobby_id, false).await?)
    }

    async fn apply(
        &self,
        game_id: GameId,
        command: GameCommand,
        rng: &mut (dyn RngCore + Send),
    ) -> GameResult<GameTransition> {
        let mut tx = self.pool.begin().await?;

        let mut table = load_game(&mut tx, "game_id", game_id, true)
            .await?
            .ok_or(GameError::GameNotFound)?;

        let status = table.apply(command, rng)?;
        save_game(&mut tx, &table).await?;

        let mut standings = Vec::new();
        if let Some(settlement) = status.settlement() {
            let winners = settlement.winner_ids();
            let losers = settlement.loser_ids();

            sqlx::query(
                "UPDATE users SET wins = wins + 1, games_played = games_played + 1 \
                 WHERE user_id = ANY($1)",
            )
            .bind(&winners)
            .execute(&mut *tx)
            .await?;
            sqlx::query(
                "UPDATE users SET losses = losses + 1, games_played = games_played + 1 \
                 WHERE user_id = ANY($1)",
            )
            .bind(&losers)
            .execute(&mut *tx)
            .await?;

            let ordered: Vec<UserId> = winners.into_iter().chain(losers).collect();
            let mut by_id: HashMap<UserId, PlayerStats> = sqlx::query(
                "SELECT user_id, username, wins, losses, games_played, profile_picture \
                 FROM users WHERE user_id = ANY($1)",
            )
            .bind(&ordered)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| stats_from_row(row).map(|s| (s.id, s)))
            .collect::<Result<_, sqlx::Error>>()?;
            standings = ordered.iter().filter_map(|id| by_id.remove(id)).collect();
        }

        tx.commit().await?;
        Ok(GameTransition {
            table,
            status,
            standings,
        })
    }
}
