//! HTTP error responses.
//!
//! Every failing handler returns an [`ApiError`], rendered as
//! `{"error": "<message>"}` with a status picked from the domain error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use cardroom::{auth::AuthError, game::GameError, lobby::LobbyError};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// An error with the status it should be sent with.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        let status = match &err {
            AuthError::Database(_) | AuthError::Corrupt(_) | AuthError::HashingFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            AuthError::MissingFields
            | AuthError::InvalidUsername(_)
            | AuthError::InvalidEmail
            | AuthError::WeakPassword(_)
            | AuthError::RoleNotAllowed(_)
            | AuthError::InvalidProfilePicture(_)
            | AuthError::UsernameTaken
            | AuthError::EmailTaken
            | AuthError::InvalidCredentials { .. } => StatusCode::BAD_REQUEST,
            AuthError::UserNotFound => StatusCode::NOT_FOUND,
            AuthError::Locked { .. } => StatusCode::TOO_MANY_REQUESTS,
            AuthError::JwtError(_) => StatusCode::UNAUTHORIZED,
        };
        if status.is_server_error() {
            tracing::error!("Auth failure: {err}");
        }
        Self::new(status, err.client_message())
    }
}

impl From<LobbyError> for ApiError {
    fn from(err: LobbyError) -> Self {
        let status = match &err {
            LobbyError::Database(_) | LobbyError::Corrupt(_) | LobbyError::HashingFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            LobbyError::NotFound | LobbyError::PlayerNotInLobby => StatusCode::NOT_FOUND,
            LobbyError::InvalidName(_) | LobbyError::InvalidMessage(_) => StatusCode::BAD_REQUEST,
            LobbyError::Forbidden(_)
            | LobbyError::Locked
            | LobbyError::NotMember
            | LobbyError::CannotRemoveSelf => StatusCode::FORBIDDEN,
            LobbyError::IncorrectPassword => StatusCode::UNAUTHORIZED,
            LobbyError::Full { .. } => StatusCode::CONFLICT,
        };
        if status.is_server_error() {
            tracing::error!("Lobby failure: {err}");
        }
        Self::new(status, err.client_message())
    }
}

impl From<GameError> for ApiError {
    fn from(err: GameError) -> Self {
        let status = match &err {
            GameError::Database(_) | GameError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GameError::GameNotFound | GameError::LobbyNotFound => StatusCode::NOT_FOUND,
            GameError::Forbidden(_) | GameError::NotInGame | GameError::Inactive => {
                StatusCode::FORBIDDEN
            }
            GameError::NotEnoughPlayers { .. }
            | GameError::TooManyPlayers { .. }
            | GameError::NotYourTurn
            | GameError::HandFinished => StatusCode::BAD_REQUEST,
            GameError::AlreadyRunning(_) => StatusCode::CONFLICT,
        };
        if status.is_server_error() {
            tracing::error!("Game failure: {err}");
        }
        Self::new(status, err.client_message())
    }
}

/// Result type for handlers
pub type ApiResult<T> = Result<T, ApiError>;
