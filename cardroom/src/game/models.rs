//! Game data models and client-facing views.

use super::{
    errors::{GameError, GameResult},
    manager::MIN_PLAYERS,
    seating::SeatRandomizer,
};
use crate::auth::{PlayerStats, UserId};
use crate::cards::Hand;
use crate::lobby::LobbyId;
use rand::Rng;
use serde::Serialize;

/// Game ID type
pub type GameId = i64;

/// Seat position at the table
pub type Seat = i32;

/// One player's row in a running game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatState {
    pub user_id: UserId,
    pub seat: Seat,
    pub hand: Hand,
    pub money: i64,
    pub is_active: bool,
    /// Stood for the rest of this hand
    pub stepped_back: bool,
    /// Acted in the current round
    pub done_turn: bool,
}

impl SeatState {
    pub fn new(user_id: UserId, seat: Seat, hand: Hand, money: i64) -> Self {
        Self {
            user_id,
            seat,
            hand,
            money,
            is_active: true,
            stepped_back: false,
            done_turn: false,
        }
    }

    /// Can still be handed the turn.
    pub fn in_play(&self) -> bool {
        self.is_active && !self.stepped_back && !self.hand.is_complete()
    }

    /// Has nothing left to do this hand.
    pub fn is_finished(&self) -> bool {
        self.stepped_back || self.hand.is_complete()
    }
}

/// A game to open. The store seats the roster it reads under lock and
/// assigns the id.
#[derive(Debug, Clone, Copy)]
pub struct NewGame {
    pub lobby_id: LobbyId,
    pub starting_money: i64,
    pub max_players: usize,
}

impl NewGame {
    /// Seat `roster` in random order and deal opening hands.
    ///
    /// # Errors
    ///
    /// * `GameError::NotEnoughPlayers` / `GameError::TooManyPlayers`
    pub fn deal<R: Rng + ?Sized>(
        &self,
        roster: &[UserId],
        rng: &mut R,
    ) -> GameResult<Vec<SeatState>> {
        let found = roster.len();
        if found < MIN_PLAYERS {
            return Err(GameError::NotEnoughPlayers {
                min: MIN_PLAYERS,
                found,
            });
        }
        if found > self.max_players {
            return Err(GameError::TooManyPlayers {
                max: self.max_players,
                found,
            });
        }
        Ok(SeatRandomizer::new(rng).deal_table(roster, self.starting_money))
    }
}

/// Player action or explicit evaluation, applied atomically by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameCommand {
    Hit { user_id: UserId },
    Stand { user_id: UserId },
    /// The player left the lobby mid-game
    Withdraw { user_id: UserId },
    Evaluate,
}

/// Final hand of one player at settlement or status check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerResult {
    pub user_id: UserId,
    pub seat_position: Seat,
    pub cards: Hand,
    pub total: u32,
}

/// Winners and losers of a finished hand
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Settlement {
    pub winners: Vec<PlayerResult>,
    pub losers: Vec<PlayerResult>,
}

impl Settlement {
    pub fn winner_ids(&self) -> Vec<UserId> {
        self.winners.iter().map(|r| r.user_id).collect()
    }

    pub fn loser_ids(&self) -> Vec<UserId> {
        self.losers.iter().map(|r| r.user_id).collect()
    }
}

/// What a round evaluation concluded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundStatus {
    /// Someone still has to act this round
    InProgress,
    /// Everyone acted; a new round began
    RoundAdvanced { round: i32 },
    /// The hand was settled and re-dealt
    Settled(Settlement),
}

impl RoundStatus {
    pub fn all_players_done(&self) -> bool {
        !matches!(self, RoundStatus::InProgress)
    }

    pub fn settlement(&self) -> Option<&Settlement> {
        match self {
            RoundStatus::Settled(settlement) => Some(settlement),
            _ => None,
        }
    }
}

/// A committed command: the new table, what evaluation concluded, and the
/// refreshed records of the users whose stats changed.
#[derive(Debug, Clone)]
pub struct GameTransition {
    pub table: super::GameTable,
    pub status: RoundStatus,
    pub standings: Vec<PlayerStats>,
}

/// One seat as shown to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatView {
    pub id: UserId,
    pub seat_position: Seat,
    pub cards: Hand,
    pub total: u32,
    pub money: i64,
    pub is_active: bool,
    pub stepped_back: bool,
    pub done_turn: bool,
}

/// Formatted game state broadcast to the lobby
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateView {
    pub game_id: GameId,
    pub lobby_id: LobbyId,
    pub current_round: i32,
    pub current_turn: Seat,
    pub pot_amount: i64,
    pub players: Vec<SeatView>,
}

/// Answer to an explicit round-status check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundReport {
    pub all_players_done: bool,
    pub round_complete: bool,
    pub game_ended: bool,
    pub winners: Vec<PlayerResult>,
    pub all_player_results: Vec<PlayerResult>,
    pub updated_players: Vec<PlayerStats>,
    pub game_state: GameStateView,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    #[test]
    fn test_deal_checks_roster_size() {
        let mut rng = StdRng::seed_from_u64(5);
        let game = NewGame {
            lobby_id: 1,
            starting_money: 500,
            max_players: 3,
        };

        assert!(matches!(
            game.deal(&[1], &mut rng),
            Err(GameError::NotEnoughPlayers { min: 2, found: 1 })
        ));
        assert!(matches!(
            game.deal(&[1, 2, 3, 4], &mut rng),
            Err(GameError::TooManyPlayers { max: 3, found: 4 })
        ));

        let seats = game.deal(&[4, 5, 6], &mut rng).unwrap();
        assert_eq!(seats.len(), 3);
        assert!(seats.iter().all(|s| s.money == 500 && s.is_active && s.hand.len() == 2));
    }
}
