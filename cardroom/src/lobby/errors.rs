//! Lobby error types.

use thiserror::Error;

/// Lobby errors
#[derive(Debug, Error)]
pub enum LobbyError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row failed to decode
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    #[error("Lobby not found")]
    NotFound,

    /// Lobby name blank or too long
    #[error("Invalid lobby name: {0}")]
    InvalidName(String),

    /// Caller's role or ownership does not permit the operation
    #[error("{0}")]
    Forbidden(String),

    #[error("Lobby is locked")]
    Locked,

    #[error("Incorrect lobby password")]
    IncorrectPassword,

    #[error("Lobby is full ({max} players)")]
    Full { max: usize },

    #[error("You are not a member of this lobby")]
    NotMember,

    #[error("Player is not in this lobby")]
    PlayerNotInLobby,

    #[error("You cannot remove yourself from the lobby")]
    CannotRemoveSelf,

    /// Chat message empty or too long
    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

impl LobbyError {
    /// Client-safe message; storage details are hidden.
    pub fn client_message(&self) -> String {
        match self {
            LobbyError::Database(_) | LobbyError::Corrupt(_) | LobbyError::HashingFailed => {
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for lobby operations
pub type LobbyResult<T> = Result<T, LobbyError>;
