//! Random seat assignment for a new table.

use super::models::{Seat, SeatState};
use crate::auth::UserId;
use crate::cards::Hand;
use rand::{Rng, seq::SliceRandom};

/// Shuffles seats `0..n` across the players so join order does not decide
/// who acts first.
pub struct SeatRandomizer<'a, R: Rng + ?Sized> {
    rng: &'a mut R,
}

impl<'a, R: Rng + ?Sized> SeatRandomizer<'a, R> {
    pub fn new(rng: &'a mut R) -> Self {
        Self { rng }
    }

    /// Assign every player a distinct seat in `0..user_ids.len()`.
    pub fn assign_seats(&mut self, user_ids: &[UserId]) -> Vec<(UserId, Seat)> {
        let mut seats: Vec<Seat> = (0..user_ids.len() as Seat).collect();
        seats.shuffle(&mut *self.rng);
        user_ids.iter().copied().zip(seats).collect()
    }

    /// Seat every player and deal each an opening hand.
    pub fn deal_table(&mut self, user_ids: &[UserId], starting_money: i64) -> Vec<SeatState> {
        self.assign_seats(user_ids)
            .into_iter()
            .map(|(user_id, seat)| {
                SeatState::new(user_id, seat, Hand::deal_initial(&mut *self.rng), starting_money)
            })
            .collect()
    }
}
