//! Account API handlers.
//!
//! Registration, login, username availability, profile edits and the public
//! stats listing.
//!
//! # Examples
//!
//! Register a new user:
//! ```bash
//! curl -X POST http://localhost:3001/api/users/register \
//!   -H "Content-Type: application/json" \
//!   -d '{"username": "player1", "email": "p1@example.com", "password": "Pass1234", "role": "host"}'
//! ```
//!
//! Login:
//! ```bash
//! curl -X POST http://localhost:3001/api/users/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"email": "p1@example.com", "password": "Pass1234"}'
//! ```

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use cardroom::auth::{
    AuthError, AuthSession, LoginRequest, PlayerStats, ProfileUpdate, RegisterRequest, User,
};
use serde::{Deserialize, Serialize};

use super::{AppState, error::ApiResult};
use crate::{logging, metrics};

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub message: &'static str,
    pub user: User,
    pub token: String,
}

impl AuthResponse {
    fn new(message: &'static str, session: AuthSession) -> Self {
        Self {
            message,
            user: session.user,
            token: session.token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub message: &'static str,
    pub user: User,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsernameAvailability {
    pub is_available: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfilePicturePayload {
    pub profile_picture: String,
}

/// Every account's public stats.
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<PlayerStats>>> {
    Ok(Json(state.auth_manager.list_users().await?))
}

/// Register a new account and log it in.
///
/// # Errors
///
/// - `400 Bad Request`: Blank field, invalid username/email, weak password,
///   `admin` role requested, or email/username already taken
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<AuthResponse>)> {
    let session = state.auth_manager.register(payload).await?;
    tracing::info!(user_id = session.user.id, "User registered");
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse::new("User created successfully", session)),
    ))
}

/// Log in with email and password.
///
/// # Errors
///
/// - `400 Bad Request`: Wrong credentials (with remaining attempts)
/// - `429 Too Many Requests`: Email locked after repeated failures
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let email = payload.email.clone();
    match state.auth_manager.login(payload).await {
        Ok(session) => {
            metrics::login_attempts_total(true);
            Ok(Json(AuthResponse::new("Login successful", session)))
        }
        Err(err) => {
            metrics::login_attempts_total(false);
            match &err {
                AuthError::InvalidCredentials { .. } => {
                    logging::log_security_event("failed_login", None, &email, &err.to_string());
                }
                AuthError::Locked { .. } => {
                    logging::log_security_event("login_locked", None, &email, &err.to_string());
                }
                _ => {}
            }
            Err(err.into())
        }
    }
}

pub async fn check_username(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> ApiResult<Json<UsernameAvailability>> {
    let is_available = state.auth_manager.check_username(&username).await?;
    Ok(Json(UsernameAvailability { is_available }))
}

pub async fn update_profile_picture(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<ProfilePicturePayload>,
) -> ApiResult<Json<UserResponse>> {
    let user = state
        .auth_manager
        .update_profile_picture(user.id, &payload.profile_picture)
        .await?;
    Ok(Json(UserResponse {
        message: "Profile picture updated successfully",
        user,
    }))
}

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<ProfileUpdate>,
) -> ApiResult<Json<UserResponse>> {
    let user = state.auth_manager.update_profile(user.id, payload).await?;
    Ok(Json(UserResponse {
        message: "Profile updated successfully",
        user,
    }))
}
