//! Game error types.

use super::models::GameId;
use thiserror::Error;

/// Game errors
#[derive(Debug, Error)]
pub enum GameError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row failed to decode
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    #[error("Game not found")]
    GameNotFound,

    #[error("Lobby not found")]
    LobbyNotFound,

    /// Caller may not perform this operation
    #[error("{0}")]
    Forbidden(String),

    #[error("At least {min} players are needed to start (have {found})")]
    NotEnoughPlayers { min: usize, found: usize },

    #[error("At most {max} players can play (have {found})")]
    TooManyPlayers { max: usize, found: usize },

    #[error("A game is already running in this lobby (game {0})")]
    AlreadyRunning(GameId),

    #[error("You are not seated in this game")]
    NotInGame,

    #[error("You are no longer active in this game")]
    Inactive,

    #[error("It is not your turn")]
    NotYourTurn,

    /// Already stood, or the hand is at 21 or over
    #[error("Your hand is already finished")]
    HandFinished,
}

impl GameError {
    /// Client-safe message; storage details are hidden.
    pub fn client_message(&self) -> String {
        match self {
            GameError::Database(_) | GameError::Corrupt(_) => "Internal server error".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for game operations
pub type GameResult<T> = Result<T, GameError>;
