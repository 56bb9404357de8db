//! Game manager: starts tables, relays player moves and broadcasts results.

use super::{
    errors::{GameError, GameResult},
    models::{GameCommand, GameId, GameStateView, NewGame, RoundReport, RoundStatus},
};
use crate::auth::{PlayerStats, User, UserId};
use crate::db::{GameCreate, GameRepository, LobbyRepository};
use crate::events::{LobbyEvent, LobbyHub};
use crate::lobby::{LobbyError, LobbyId, MAX_LOBBY_PLAYERS};
use rand::{SeedableRng, rngs::StdRng};
use std::sync::{Arc, Mutex, PoisonError};

/// Chips each player brings to a new table
pub const DEFAULT_STARTING_MONEY: i64 = 1000;

/// Fewest players a table can start with
pub const MIN_PLAYERS: usize = 2;

/// Result of a hit, stand or withdrawal
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub state: GameStateView,
    pub status: RoundStatus,
}

/// Game manager
pub struct GameManager {
    games: Arc<dyn GameRepository>,
    lobbies: Arc<dyn LobbyRepository>,
    hub: Arc<LobbyHub>,
    starting_money: i64,
    max_players: usize,
    rng: Mutex<StdRng>,
}

impl GameManager {
    pub fn new(
        games: Arc<dyn GameRepository>,
        lobbies: Arc<dyn LobbyRepository>,
        hub: Arc<LobbyHub>,
    ) -> Self {
        Self {
            games,
            lobbies,
            hub,
            starting_money: DEFAULT_STARTING_MONEY,
            max_players: MAX_LOBBY_PLAYERS,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    pub fn with_starting_money(mut self, starting_money: i64) -> Self {
        self.starting_money = starting_money;
        self
    }

    pub fn with_max_players(mut self, max_players: usize) -> Self {
        self.max_players = max_players.clamp(MIN_PLAYERS, MAX_LOBBY_PLAYERS);
        self
    }

    /// Make seating and dealing reproducible.
    pub fn with_rng_seed(self, seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            ..self
        }
    }

    /// Per-operation generator, so the shared lock is never held across an await.
    fn child_rng(&self) -> StdRng {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        StdRng::from_rng(&mut *rng)
    }

    /// Seat the lobby's roster at a new table.
    ///
    /// The store reads the roster under the same lock as the insert, so a
    /// player who leaves while the table is being set up is never seated.
    ///
    /// # Errors
    ///
    /// * `GameError::LobbyNotFound` - No such lobby
    /// * `GameError::Forbidden` - Caller is neither the host nor an admin
    /// * `GameError::NotEnoughPlayers` / `GameError::TooManyPlayers`
    /// * `GameError::AlreadyRunning` - The lobby already has a table
    pub async fn start(&self, lobby_id: LobbyId, actor: &User) -> GameResult<GameStateView> {
        let lobby = self
            .lobbies
            .find_lobby(lobby_id)
            .await
            .map_err(from_lobby_error)?
            .ok_or(GameError::LobbyNotFound)?;

        if !lobby.is_owner(actor.id) && !actor.role.is_admin() {
            return Err(GameError::Forbidden(
                "Only the lobby host or an admin can start the game".to_string(),
            ));
        }

        let game = NewGame {
            lobby_id,
            starting_money: self.starting_money,
            max_players: self.max_players,
        };
        let mut rng = self.child_rng();

        let _sequence = self.hub.sequence(lobby_id).await;
        match self.games.create_game(game, &mut rng).await? {
            GameCreate::Created(table) => {
                log::info!(
                    "Game {} started in lobby {lobby_id} with {} players",
                    table.id,
                    table.players.len()
                );
                let state = table.view();
                self.hub
                    .publish(lobby_id, LobbyEvent::GameStarted(state.clone()))
                    .await;
                Ok(state)
            }
            GameCreate::AlreadyRunning(game_id) => Err(GameError::AlreadyRunning(game_id)),
        }
    }

    pub async fn state(&self, game_id: GameId) -> GameResult<GameStateView> {
        self.games
            .find_game(game_id)
            .await?
            .map(|table| table.view())
            .ok_or(GameError::GameNotFound)
    }

    pub async fn state_for_lobby(&self, lobby_id: LobbyId) -> GameResult<GameStateView> {
        self.games
            .find_game_for_lobby(lobby_id)
            .await?
            .map(|table| table.view())
            .ok_or(GameError::GameNotFound)
    }

    /// Draw a card for the player on turn.
    pub async fn hit(&self, game_id: GameId, user_id: UserId) -> GameResult<TurnOutcome> {
        self.play(game_id, GameCommand::Hit { user_id }).await
    }

    /// Stand for the rest of the hand.
    pub async fn skip(&self, game_id: GameId, user_id: UserId) -> GameResult<TurnOutcome> {
        self.play(game_id, GameCommand::Stand { user_id }).await
    }

    /// Take a player who left the lobby out of its running game, if any.
    pub async fn withdraw(
        &self,
        lobby_id: LobbyId,
        user_id: UserId,
    ) -> GameResult<Option<TurnOutcome>> {
        let Some(table) = self.games.find_game_for_lobby(lobby_id).await? else {
            return Ok(None);
        };
        if !table.player(user_id).is_some_and(|p| p.is_active) {
            return Ok(None);
        }

        log::info!("User {user_id} withdrawn from game {}", table.id);
        self.play(table.id, GameCommand::Withdraw { user_id })
            .await
            .map(Some)
    }

    /// Evaluate the round without a move and report where it stands.
    pub async fn check_round_status(&self, game_id: GameId) -> GameResult<RoundReport> {
        let lobby_id = self.lobby_of(game_id).await?;
        let mut rng = self.child_rng();

        let _sequence = self.hub.sequence(lobby_id).await;
        let transition = self
            .games
            .apply(game_id, GameCommand::Evaluate, &mut rng)
            .await?;

        let game_state = transition.table.view();
        if transition.status.all_players_done() {
            self.hub
                .publish(
                    game_state.lobby_id,
                    LobbyEvent::GameStateUpdated(game_state.clone()),
                )
                .await;
            self.broadcast(&game_state, &transition.status, &transition.standings)
                .await;
        }

        let all_players_done = transition.status.all_players_done();
        let report = match transition.status {
            RoundStatus::Settled(settlement) => RoundReport {
                all_players_done,
                round_complete: true,
                game_ended: true,
                all_player_results: settlement
                    .winners
                    .iter()
                    .chain(&settlement.losers)
                    .cloned()
                    .collect(),
                winners: settlement.winners,
                updated_players: transition.standings,
                game_state,
            },
            _ => RoundReport {
                all_players_done,
                round_complete: all_players_done,
                game_ended: false,
                winners: Vec::new(),
                all_player_results: transition.table.results(),
                updated_players: Vec::new(),
                game_state,
            },
        };
        Ok(report)
    }

    /// Lobby a game belongs to. It never changes for the life of the game.
    async fn lobby_of(&self, game_id: GameId) -> GameResult<LobbyId> {
        self.games
            .find_game(game_id)
            .await?
            .map(|table| table.lobby_id)
            .ok_or(GameError::GameNotFound)
    }

    async fn play(&self, game_id: GameId, command: GameCommand) -> GameResult<TurnOutcome> {
        let lobby_id = self.lobby_of(game_id).await?;
        let mut rng = self.child_rng();

        let _sequence = self.hub.sequence(lobby_id).await;
        let transition = self.games.apply(game_id, command, &mut rng).await?;

        let state = transition.table.view();
        self.hub
            .publish(
                transition.table.lobby_id,
                LobbyEvent::GameStateUpdated(state.clone()),
            )
            .await;
        self.broadcast(&state, &transition.status, &transition.standings)
            .await;

        Ok(TurnOutcome {
            state,
            status: transition.status,
        })
    }

    /// Announce a settled hand to the lobby.
    async fn broadcast(
        &self,
        state: &GameStateView,
        status: &RoundStatus,
        standings: &[PlayerStats],
    ) {
        let Some(settlement) = status.settlement() else {
            return;
        };
        self.hub
            .publish(
                state.lobby_id,
                LobbyEvent::GameEnded {
                    winners: settlement.winners.clone(),
                    losers: settlement.losers.clone(),
                    updated_players: standings.to_vec(),
                    new_game_state: state.clone(),
                },
            )
            .await;
    }
}

fn from_lobby_error(err: LobbyError) -> GameError {
    match err {
        LobbyError::Database(e) => GameError::Database(e),
        LobbyError::NotFound => GameError::LobbyNotFound,
        other => GameError::Corrupt(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewUser, Role, UserWrite};
    use crate::db::{MemoryStore, UserRepository};
    use crate::events::RoomMessage;
    use crate::lobby::{
        CreateLobbyRequest, JoinRequest, LeaveOutcome, LobbyManager, LobbyQuery, LobbyRecord,
        LobbyResult, MembershipChange, NewLobby, SettingsUpdate,
    };
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    /// Memory store whose lobby lookups take a while to return.
    struct SlowLookups(Arc<MemoryStore>);

    #[async_trait]
    impl LobbyRepository for SlowLookups {
        async fn create_lobby(&self, lobby: NewLobby) -> LobbyResult<LobbyRecord> {
            self.0.create_lobby(lobby).await
        }

        async fn find_lobby(&self, lobby_id: LobbyId) -> LobbyResult<Option<LobbyRecord>> {
            let found = self.0.find_lobby(lobby_id).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            found
        }

        async fn list_lobbies(&self, query: &LobbyQuery) -> LobbyResult<Vec<LobbyRecord>> {
            self.0.list_lobbies(query).await
        }

        async fn add_member(
            &self,
            lobby_id: LobbyId,
            join: JoinRequest<'_>,
        ) -> LobbyResult<MembershipChange> {
            self.0.add_member(lobby_id, join).await
        }

        async fn remove_member(
            &self,
            lobby_id: LobbyId,
            user_id: UserId,
        ) -> LobbyResult<MembershipChange> {
            self.0.remove_member(lobby_id, user_id).await
        }

        async fn leave_lobby(
            &self,
            lobby_id: LobbyId,
            user_id: UserId,
        ) -> LobbyResult<LeaveOutcome> {
            self.0.leave_lobby(lobby_id, user_id).await
        }

        async fn update_settings(
            &self,
            lobby_id: LobbyId,
            update: &SettingsUpdate,
        ) -> LobbyResult<Option<LobbyRecord>> {
            self.0.update_settings(lobby_id, update).await
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        hub: Arc<LobbyHub>,
        lobbies: LobbyManager,
        games: GameManager,
        host: User,
        guest: User,
        lobby_id: LobbyId,
    }

    async fn user(store: &MemoryStore, name: &str, role: Role) -> User {
        match store
            .create_user(NewUser {
                username: name.to_string(),
                email: format!("{name}@example.com"),
                password_hash: "unused".to_string(),
                role,
            })
            .await
            .unwrap()
        {
            UserWrite::Saved(u) => u,
            other => panic!("unexpected {other:?}"),
        }
    }

    async fn fixture(seed: u64) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let hub = Arc::new(LobbyHub::new());
        let lobbies = LobbyManager::new(store.clone(), hub.clone());
        let games = GameManager::new(store.clone(), store.clone(), hub.clone()).with_rng_seed(seed);

        let host = user(&store, "host", Role::Host).await;
        let guest = user(&store, "guest", Role::User).await;
        let lobby = lobbies
            .create(
                &host,
                CreateLobbyRequest {
                    name: "Table".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        Fixture {
            store,
            hub,
            lobbies,
            games,
            host,
            guest,
            lobby_id: lobby.id,
        }
    }

    async fn listen(hub: &LobbyHub, lobby_id: LobbyId) -> mpsc::Receiver<RoomMessage> {
        let (tx, rx) = mpsc::channel(64);
        hub.subscribe(lobby_id, Uuid::new_v4(), 0, tx).await;
        rx
    }

    fn drain(rx: &mut mpsc::Receiver<RoomMessage>) -> Vec<&'static str> {
        let mut names = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            names.push(msg.event.name());
        }
        names
    }

    /// User on turn who can still act, if any
    fn on_turn(state: &GameStateView) -> Option<UserId> {
        state
            .players
            .iter()
            .find(|p| {
                p.seat_position == state.current_turn
                    && p.is_active
                    && !p.stepped_back
                    && p.total < 21
            })
            .map(|p| p.id)
    }

    #[tokio::test]
    async fn test_start_rules() {
        let f = fixture(1).await;

        let err = f.games.start(f.lobby_id, &f.host).await.unwrap_err();
        assert!(matches!(err, GameError::NotEnoughPlayers { min: 2, found: 1 }));

        f.lobbies.join(f.lobby_id, &f.guest, None).await.unwrap();
        let err = f.games.start(f.lobby_id, &f.guest).await.unwrap_err();
        assert!(matches!(err, GameError::Forbidden(_)));
        let err = f.games.start(4242, &f.host).await.unwrap_err();
        assert!(matches!(err, GameError::LobbyNotFound));

        let mut rx = listen(&f.hub, f.lobby_id).await;
        let state = f.games.start(f.lobby_id, &f.host).await.unwrap();
        assert_eq!(state.current_round, 1);
        assert_eq!(state.players.len(), 2);
        let mut seats: Vec<_> = state.players.iter().map(|p| p.seat_position).collect();
        seats.sort_unstable();
        assert_eq!(seats, vec![0, 1]);
        assert!(state.players.iter().all(|p| p.cards.len() == 2 && p.money == 1000));
        assert_eq!(drain(&mut rx), vec!["game_started"]);

        let err = f.games.start(f.lobby_id, &f.host).await.unwrap_err();
        assert!(matches!(err, GameError::AlreadyRunning(id) if id == state.game_id));

        assert_eq!(f.games.state_for_lobby(f.lobby_id).await.unwrap(), state);
        assert_eq!(f.games.state(state.game_id).await.unwrap(), state);
        assert!(matches!(
            f.games.state(state.game_id + 1).await.unwrap_err(),
            GameError::GameNotFound
        ));
    }

    #[tokio::test]
    async fn test_standing_out_settles_and_records_stats() {
        let f = fixture(7).await;
        f.lobbies.join(f.lobby_id, &f.guest, None).await.unwrap();
        let mut state = f.games.start(f.lobby_id, &f.host).await.unwrap();
        let mut rx = listen(&f.hub, f.lobby_id).await;

        let mut ended = false;
        for _ in 0..4 {
            match on_turn(&state) {
                Some(user_id) => {
                    let outcome = f.games.skip(state.game_id, user_id).await.unwrap();
                    state = outcome.state;
                    if outcome.status.settlement().is_some() {
                        ended = true;
                        break;
                    }
                }
                None => {
                    let report = f.games.check_round_status(state.game_id).await.unwrap();
                    assert!(report.game_ended);
                    assert_eq!(report.all_player_results.len(), 2);
                    ended = true;
                    break;
                }
            }
        }
        assert!(ended);
        assert!(drain(&mut rx).contains(&"game_ended"));

        // The table is re-dealt for the next hand
        let fresh = f.games.state(state.game_id).await.unwrap();
        assert_eq!(fresh.current_round, 1);
        assert!(fresh.players.iter().all(|p| p.cards.len() == 2 && !p.stepped_back));

        let stats = f.store.list_stats().await.unwrap();
        assert!(stats.iter().all(|s| s.games_played == 1 && s.wins + s.losses == 1));
        assert!(stats.iter().any(|s| s.wins == 1));
    }

    #[tokio::test]
    async fn test_only_the_player_on_turn_may_act() {
        let f = fixture(11).await;
        f.lobbies.join(f.lobby_id, &f.guest, None).await.unwrap();
        let state = f.games.start(f.lobby_id, &f.host).await.unwrap();

        let Some(acting) = on_turn(&state) else {
            return;
        };
        let waiting = if acting == f.host.id { f.guest.id } else { f.host.id };

        let err = f.games.hit(state.game_id, waiting).await.unwrap_err();
        assert!(matches!(
            err,
            GameError::NotYourTurn | GameError::HandFinished
        ));
        let err = f.games.hit(state.game_id, 999).await.unwrap_err();
        assert!(matches!(err, GameError::NotInGame));

        // A rejected move leaves the stored game untouched
        assert_eq!(f.games.state(state.game_id).await.unwrap(), state);

        let outcome = f.games.hit(state.game_id, acting).await.unwrap();
        let me = outcome.state.players.iter().find(|p| p.id == acting).unwrap();
        assert!(me.cards.len() == 3 || outcome.status.settlement().is_some());
    }

    #[tokio::test]
    async fn test_withdrawn_player_leaves_the_table() {
        let f = fixture(3).await;
        f.lobbies.join(f.lobby_id, &f.guest, None).await.unwrap();
        let state = f.games.start(f.lobby_id, &f.host).await.unwrap();

        let outcome = f
            .games
            .withdraw(f.lobby_id, f.guest.id)
            .await
            .unwrap()
            .expect("guest is seated");
        assert!(!outcome.state.players.iter().find(|p| p.id == f.guest.id).unwrap().is_active);
        assert!(f.games.withdraw(f.lobby_id, f.guest.id).await.unwrap().is_none());
        assert!(f.games.withdraw(f.lobby_id + 1, f.guest.id).await.unwrap().is_none());

        let settlement = match outcome.status {
            RoundStatus::Settled(s) => s,
            _ => {
                let outcome = f.games.skip(state.game_id, f.host.id).await.unwrap();
                outcome.status.settlement().cloned().expect("host alone settles")
            }
        };
        assert_eq!(settlement.winner_ids(), vec![f.host.id]);
        assert!(settlement.losers.is_empty());
    }

    #[tokio::test]
    async fn test_player_leaving_during_start_is_not_seated() {
        let f = fixture(5).await;
        let third = user(&f.store, "third", Role::User).await;
        f.lobbies.join(f.lobby_id, &f.guest, None).await.unwrap();
        f.lobbies.join(f.lobby_id, &third, None).await.unwrap();

        let games = Arc::new(
            GameManager::new(
                f.store.clone(),
                Arc::new(SlowLookups(f.store.clone())),
                f.hub.clone(),
            )
            .with_rng_seed(5),
        );
        let starting = {
            let games = games.clone();
            let (lobby_id, host) = (f.lobby_id, f.host.clone());
            tokio::spawn(async move { games.start(lobby_id, &host).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        f.lobbies.leave(f.lobby_id, &f.guest).await.unwrap();
        games.withdraw(f.lobby_id, f.guest.id).await.unwrap();
        let state = starting.await.unwrap().unwrap();

        let roster = f.lobbies.get(f.lobby_id).await.unwrap();
        let members: Vec<UserId> = roster.players.iter().map(|p| p.id).collect();
        assert!(!members.contains(&f.guest.id));
        assert!(
            state
                .players
                .iter()
                .filter(|p| p.is_active)
                .all(|p| members.contains(&p.id))
        );
        assert_eq!(state.players.len(), 2);
    }
}
