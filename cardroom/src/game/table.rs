//! Table rules: turn order, round evaluation and settlement.
//!
//! [`GameTable`] is a plain value. Stores load it under a row lock, call
//! [`GameTable::apply`], and write the result back in the same transaction,
//! so every rule here runs against a consistent snapshot.

use super::{
    errors::{GameError, GameResult},
    models::{
        GameCommand, GameId, GameStateView, PlayerResult, RoundStatus, Seat, SeatState, SeatView,
        Settlement,
    },
};
use crate::auth::UserId;
use crate::cards::{Hand, Rank, TWENTY_ONE, draw_card};
use crate::lobby::LobbyId;
use rand::Rng;

/// A running game and its seats, ordered by seat position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameTable {
    pub id: GameId,
    pub lobby_id: LobbyId,
    pub current_round: i32,
    pub current_turn: Seat,
    pub pot_amount: i64,
    pub players: Vec<SeatState>,
}

impl GameTable {
    /// Fresh table in round 1 with the turn on the lowest seat that can act.
    pub fn new(id: GameId, lobby_id: LobbyId, mut seats: Vec<SeatState>) -> Self {
        seats.sort_by_key(|s| s.seat);
        let mut table = Self {
            id,
            lobby_id,
            current_round: 1,
            current_turn: 0,
            pot_amount: 0,
            players: seats,
        };
        table.current_turn = table.opening_seat();
        table
    }

    /// Rebuild a table from stored columns.
    pub fn restore(
        id: GameId,
        lobby_id: LobbyId,
        current_round: i32,
        current_turn: Seat,
        pot_amount: i64,
        mut seats: Vec<SeatState>,
    ) -> Self {
        seats.sort_by_key(|s| s.seat);
        Self {
            id,
            lobby_id,
            current_round,
            current_turn,
            pot_amount,
            players: seats,
        }
    }

    pub fn player(&self, user_id: UserId) -> Option<&SeatState> {
        self.players.iter().find(|p| p.user_id == user_id)
    }

    pub fn is_seated(&self, user_id: UserId) -> bool {
        self.player(user_id).is_some()
    }

    /// Run one command and then evaluate the round.
    pub fn apply<R: Rng + ?Sized>(
        &mut self,
        command: GameCommand,
        rng: &mut R,
    ) -> GameResult<RoundStatus> {
        match command {
            GameCommand::Hit { user_id } => {
                self.hit(user_id, rng)?;
            }
            GameCommand::Stand { user_id } => self.stand(user_id)?,
            GameCommand::Withdraw { user_id } => self.withdraw(user_id)?,
            GameCommand::Evaluate => {}
        }
        Ok(self.evaluate(rng))
    }

    /// Take one card. Returns the card drawn.
    pub fn hit<R: Rng + ?Sized>(&mut self, user_id: UserId, rng: &mut R) -> GameResult<Rank> {
        let idx = self.acting_player(user_id)?;
        let card = draw_card(rng);

        let player = &mut self.players[idx];
        player.hand.push(card);
        player.done_turn = true;

        self.advance_turn();
        Ok(card)
    }

    /// Stand for the rest of the hand.
    pub fn stand(&mut self, user_id: UserId) -> GameResult<()> {
        let idx = self.acting_player(user_id)?;

        let player = &mut self.players[idx];
        player.stepped_back = true;
        player.done_turn = true;

        self.advance_turn();
        Ok(())
    }

    /// Take a departed player out of play, passing the turn on if it was theirs.
    pub fn withdraw(&mut self, user_id: UserId) -> GameResult<()> {
        let idx = self.seat_index(user_id)?;
        let had_turn = self.players[idx].seat == self.current_turn;

        let player = &mut self.players[idx];
        player.is_active = false;
        player.done_turn = true;

        if had_turn {
            self.advance_turn();
        }
        Ok(())
    }

    /// Next seat after the current one, wrapping, that can be handed the
    /// turn. Players who have not acted this round come first.
    pub fn next_turn(&self) -> Option<Seat> {
        let circular = || {
            self.players
                .iter()
                .filter(|p| p.seat > self.current_turn)
                .chain(self.players.iter().filter(|p| p.seat <= self.current_turn))
        };

        circular()
            .find(|p| p.in_play() && !p.done_turn)
            .or_else(|| circular().find(|p| p.in_play()))
            .map(|p| p.seat)
    }

    /// Settle the hand when nobody can act, or open a new round when every
    /// active player has acted.
    pub fn evaluate<R: Rng + ?Sized>(&mut self, rng: &mut R) -> RoundStatus {
        let mut active = self.players.iter().filter(|p| p.is_active).peekable();
        if active.peek().is_none() {
            return RoundStatus::InProgress;
        }

        let (all_finished, all_done) = active.fold((true, true), |(finished, done), p| {
            (finished && p.is_finished(), done && p.done_turn)
        });

        if all_finished {
            return RoundStatus::Settled(self.settle(rng));
        }

        if all_done {
            self.current_round += 1;
            for player in self.players.iter_mut().filter(|p| p.in_play()) {
                player.done_turn = false;
            }
            self.current_turn = self.opening_seat();
            return RoundStatus::RoundAdvanced {
                round: self.current_round,
            };
        }

        RoundStatus::InProgress
    }

    /// Current hands of every active player, in seat order.
    pub fn results(&self) -> Vec<PlayerResult> {
        self.players
            .iter()
            .filter(|p| p.is_active)
            .map(|p| PlayerResult {
                user_id: p.user_id,
                seat_position: p.seat,
                cards: p.hand.clone(),
                total: p.hand.total(),
            })
            .collect()
    }

    pub fn view(&self) -> GameStateView {
        GameStateView {
            game_id: self.id,
            lobby_id: self.lobby_id,
            current_round: self.current_round,
            current_turn: self.current_turn,
            pot_amount: self.pot_amount,
            players: self
                .players
                .iter()
                .map(|p| SeatView {
                    id: p.user_id,
                    seat_position: p.seat,
                    cards: p.hand.clone(),
                    total: p.hand.total(),
                    money: p.money,
                    is_active: p.is_active,
                    stepped_back: p.stepped_back,
                    done_turn: p.done_turn,
                })
                .collect(),
        }
    }

    fn settle<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Settlement {
        let results = self.results();
        let best = results
            .iter()
            .map(|r| r.total)
            .filter(|&total| total <= TWENTY_ONE)
            .max();

        let (winners, losers): (Vec<PlayerResult>, Vec<PlayerResult>) = results
            .into_iter()
            .partition(|r| best.is_some_and(|b| r.total == b));

        for player in self.players.iter_mut().filter(|p| p.is_active) {
            player.hand = Hand::deal_initial(rng);
            player.stepped_back = false;
            player.done_turn = false;
        }
        self.current_round = 1;
        self.current_turn = self.opening_seat();

        log::info!(
            "Game {} settled: {} winner(s), {} loser(s)",
            self.id,
            winners.len(),
            losers.len()
        );

        Settlement { winners, losers }
    }

    fn seat_index(&self, user_id: UserId) -> GameResult<usize> {
        self.players
            .iter()
            .position(|p| p.user_id == user_id)
            .ok_or(GameError::NotInGame)
    }

    fn acting_player(&self, user_id: UserId) -> GameResult<usize> {
        let idx = self.seat_index(user_id)?;
        let player = &self.players[idx];

        if !player.is_active {
            return Err(GameError::Inactive);
        }
        if player.is_finished() {
            return Err(GameError::HandFinished);
        }
        if player.seat != self.current_turn {
            return Err(GameError::NotYourTurn);
        }
        Ok(idx)
    }

    fn advance_turn(&mut self) {
        if let Some(seat) = self.next_turn() {
            self.current_turn = seat;
        }
    }

    fn opening_seat(&self) -> Seat {
        self.players
            .iter()
            .find(|p| p.in_play())
            .or_else(|| self.players.iter().find(|p| p.is_active))
            .or_else(|| self.players.first())
            .map_or(0, |p| p.seat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn seat(user_id: UserId, seat: Seat, cards: &str) -> SeatState {
        SeatState::new(user_id, seat, Hand::parse(cards).unwrap(), 1000)
    }

    fn rng() -> StdRng {
        StdRng::seed_from_u64(0xC0FFEE)
    }

    fn three_players() -> GameTable {
        GameTable::new(
            1,
            10,
            vec![seat(30, 2, "2,3"), seat(10, 0, "2,2"), seat(20, 1, "3,3")],
        )
    }

    #[test]
    fn test_new_sorts_seats_and_opens_on_lowest() {
        let table = three_players();
        let seats: Vec<Seat> = table.players.iter().map(|p| p.seat).collect();
        assert_eq!(seats, vec![0, 1, 2]);
        assert_eq!(table.current_turn, 0);
        assert_eq!(table.current_round, 1);
    }

    #[test]
    fn test_opening_turn_skips_natural_twenty_one() {
        let table = GameTable::new(1, 1, vec![seat(1, 0, "A,K"), seat(2, 1, "2,3")]);
        assert_eq!(table.current_turn, 1);
    }

    #[test]
    fn test_hit_appends_card_and_passes_turn() {
        let mut table = three_players();
        let mut rng = rng();

        table.hit(10, &mut rng).unwrap();

        let player = table.player(10).unwrap();
        assert_eq!(player.hand.len(), 3);
        assert!(player.done_turn);
        assert_eq!(table.current_turn, 1);
    }

    #[test]
    fn test_out_of_turn_rejected() {
        let mut table = three_players();
        let err = table.hit(20, &mut rng()).unwrap_err();
        assert!(matches!(err, GameError::NotYourTurn));
        assert_eq!(table.player(20).unwrap().hand.len(), 2);
    }

    #[test]
    fn test_unknown_player_rejected() {
        let mut table = three_players();
        assert!(matches!(table.stand(99), Err(GameError::NotInGame)));
    }

    #[test]
    fn test_stand_marks_stepped_back() {
        let mut table = three_players();
        table.stand(10).unwrap();

        let player = table.player(10).unwrap();
        assert!(player.stepped_back);
        assert!(player.done_turn);
        assert_eq!(table.current_turn, 1);
        assert!(matches!(table.hit(10, &mut rng()), Err(GameError::HandFinished)));
    }

    #[test]
    fn test_turn_wraps_around() {
        let mut table = three_players();
        table.current_turn = 2;
        table.players[0].done_turn = false;
        assert_eq!(table.next_turn(), Some(0));
    }

    #[test]
    fn test_turn_skips_finished_players() {
        let mut table = three_players();
        table.players[1].stepped_back = true;
        assert_eq!(table.next_turn(), Some(2));

        table.players[2].hand = Hand::parse("K,Q,A").unwrap();
        assert_eq!(table.next_turn(), Some(0));
    }

    #[test]
    fn test_turn_unchanged_when_nobody_can_act() {
        let mut table = GameTable::new(1, 1, vec![seat(1, 0, "K,Q"), seat(2, 1, "K,9")]);
        table.stand(1).unwrap();
        assert_eq!(table.current_turn, 1);
        table.players[1].stepped_back = true;
        assert_eq!(table.next_turn(), None);
    }

    #[test]
    fn test_round_advances_when_everyone_acted() {
        let mut table = three_players();
        let mut rng = rng();

        assert_eq!(
            table.apply(GameCommand::Hit { user_id: 10 }, &mut rng).unwrap(),
            RoundStatus::InProgress
        );
        assert_eq!(
            table.apply(GameCommand::Stand { user_id: 20 }, &mut rng).unwrap(),
            RoundStatus::InProgress
        );
        let status = table
            .apply(GameCommand::Hit { user_id: 30 }, &mut rng)
            .unwrap();

        assert_eq!(status, RoundStatus::RoundAdvanced { round: 2 });
        assert_eq!(table.current_round, 2);
        assert_eq!(table.current_turn, 0);
        assert!(!table.player(10).unwrap().done_turn);
        assert!(!table.player(30).unwrap().done_turn);
        // Stood players keep their flags.
        assert!(table.player(20).unwrap().done_turn);
        assert!(table.player(20).unwrap().stepped_back);
    }

    #[test]
    fn test_settles_when_everyone_stands() {
        let mut table = GameTable::new(7, 3, vec![seat(1, 0, "K,Q"), seat(2, 1, "K,9")]);
        let mut rng = rng();

        table.apply(GameCommand::Stand { user_id: 1 }, &mut rng).unwrap();
        let status = table
            .apply(GameCommand::Stand { user_id: 2 }, &mut rng)
            .unwrap();

        let settlement = status.settlement().expect("hand should settle");
        assert_eq!(settlement.winner_ids(), vec![1]);
        assert_eq!(settlement.loser_ids(), vec![2]);
        assert_eq!(settlement.winners[0].total, 20);

        // Re-dealt and reset.
        assert_eq!(table.current_round, 1);
        for p in &table.players {
            assert_eq!(p.hand.len(), 2);
            assert!(!p.stepped_back);
            assert!(!p.done_turn);
        }
    }

    #[test]
    fn test_ties_share_the_win() {
        let mut table = GameTable::new(1, 1, vec![seat(1, 0, "K,9"), seat(2, 1, "10,9")]);
        table.players.iter_mut().for_each(|p| p.stepped_back = true);

        let status = table.evaluate(&mut rng());
        assert_eq!(status.settlement().unwrap().winner_ids(), vec![1, 2]);
    }

    #[test]
    fn test_all_bust_means_no_winner() {
        let mut table = GameTable::new(1, 1, vec![seat(1, 0, "K,Q,5"), seat(2, 1, "K,9,9")]);
        let status = table.evaluate(&mut rng());

        let settlement = status.settlement().unwrap();
        assert!(settlement.winners.is_empty());
        assert_eq!(settlement.loser_ids(), vec![1, 2]);
    }

    #[test]
    fn test_bust_player_loses_to_lower_total() {
        let mut table = GameTable::new(1, 1, vec![seat(1, 0, "K,Q,5"), seat(2, 1, "2,3")]);
        table.players[1].stepped_back = true;

        let settlement = table.evaluate(&mut rng()).settlement().cloned().unwrap();
        assert_eq!(settlement.winner_ids(), vec![2]);
        assert_eq!(settlement.loser_ids(), vec![1]);
    }

    #[test]
    fn test_withdraw_passes_turn_and_excludes_from_settlement() {
        let mut table = GameTable::new(1, 1, vec![seat(1, 0, "K,Q"), seat(2, 1, "K,9")]);
        let mut rng = rng();

        table
            .apply(GameCommand::Withdraw { user_id: 1 }, &mut rng)
            .unwrap();
        assert_eq!(table.current_turn, 1);

        let status = table
            .apply(GameCommand::Stand { user_id: 2 }, &mut rng)
            .unwrap();
        let settlement = status.settlement().unwrap();
        assert_eq!(settlement.winner_ids(), vec![2]);
        assert!(settlement.losers.is_empty());
        // Withdrawn seat is not re-dealt.
        assert_eq!(table.player(1).unwrap().hand.to_string(), "K,Q");
    }

    #[test]
    fn test_evaluate_without_active_players_is_noop() {
        let mut table = GameTable::new(1, 1, vec![seat(1, 0, "2,3")]);
        table.players[0].is_active = false;
        assert_eq!(table.evaluate(&mut rng()), RoundStatus::InProgress);
    }

    #[test]
    fn test_view_reports_totals() {
        let table = GameTable::new(4, 9, vec![seat(1, 0, "A,9")]);
        let view = table.view();
        assert_eq!(view.game_id, 4);
        assert_eq!(view.lobby_id, 9);
        assert_eq!(view.players[0].total, 20);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["players"][0]["seatPosition"], 0);
        assert_eq!(json["players"][0]["cards"][0], "A");
    }
}
