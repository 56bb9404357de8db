//! Twenty-one table engine.
//!
//! This module provides:
//! - Random seating and opening deals ([`SeatRandomizer`])
//! - Turn rotation, round evaluation and settlement ([`GameTable`])
//! - The async [`GameManager`] that runs each move inside one store
//!   transaction and broadcasts the result to the lobby

pub mod errors;
pub mod manager;
pub mod models;
pub mod seating;
pub mod table;

pub use errors::{GameError, GameResult};
pub use manager::{DEFAULT_STARTING_MONEY, GameManager, MIN_PLAYERS, TurnOutcome};
pub use models::{
    GameCommand, GameId, GameStateView, GameTransition, NewGame, PlayerResult, RoundReport,
    RoundStatus, Seat, SeatState, SeatView, Settlement,
};
pub use seating::SeatRandomizer;
pub use table::GameTable;
