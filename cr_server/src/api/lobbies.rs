//! Lobby API handlers.
//!
//! Listing and inspecting lobbies is public; everything that changes a
//! roster or a lobby's settings requires a bearer token. Leaving or being
//! removed from a lobby also takes the player out of its running game.
//!
//! # Examples
//!
//! List open-door lobbies by name:
//! ```bash
//! curl "http://localhost:3001/api/lobbies?sortBy=name&order=asc&includePasswordProtected=no"
//! ```
//!
//! Join a password-protected lobby:
//! ```bash
//! curl -X POST http://localhost:3001/api/lobbies/join/4 \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"password": "secret"}'
//! ```

use axum::{
    Extension, Json,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
};
use cardroom::{
    auth::{User, UserId},
    lobby::{
        CreateLobbyRequest, LeaveResult, LobbyId, LobbyQuery, LobbySettings, LobbyView,
    },
};
use serde::{Deserialize, Serialize};

use super::{
    AppState,
    error::{ApiError, ApiResult},
};
use crate::metrics;

/// Raw listing parameters, as the front end sends them.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub sort_by: Option<String>,
    pub order: Option<String>,
    pub include_password_protected: Option<String>,
}

impl ListParams {
    fn into_query(self) -> Result<LobbyQuery, ApiError> {
        let mut query = LobbyQuery::default();
        if let Some(sort) = self.sort_by.as_deref().filter(|s| !s.is_empty()) {
            query.sort = sort.parse().map_err(ApiError::bad_request)?;
        }
        if let Some(order) = self.order.as_deref().filter(|s| !s.is_empty()) {
            query.order = order.parse().map_err(ApiError::bad_request)?;
        }
        if let Some(filter) = self
            .include_password_protected
            .as_deref()
            .filter(|s| !s.is_empty())
        {
            query.password = filter.parse().map_err(ApiError::bad_request)?;
        }
        Ok(query)
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct JoinPayload {
    #[serde(default)]
    pub password: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovePlayerPayload {
    pub player_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct LobbyResponse {
    pub message: &'static str,
    pub lobby: LobbyView,
}

#[derive(Debug, Serialize)]
pub struct LeaveResponse {
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lobby: Option<LobbyView>,
}

pub async fn list_lobbies(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<LobbyView>>> {
    let query = params.into_query()?;
    Ok(Json(state.lobby_manager.list(&query).await?))
}

pub async fn get_lobby(
    State(state): State<AppState>,
    Path(lobby_id): Path<LobbyId>,
) -> ApiResult<Json<LobbyView>> {
    Ok(Json(state.lobby_manager.get(lobby_id).await?))
}

/// Open a lobby hosted by the caller.
///
/// # Errors
///
/// - `403 Forbidden`: Caller's role cannot host
/// - `400 Bad Request`: Blank or overlong name
pub async fn create_lobby(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<CreateLobbyRequest>,
) -> ApiResult<(StatusCode, Json<LobbyResponse>)> {
    let lobby = state.lobby_manager.create(&user, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(LobbyResponse {
            message: "Lobby created successfully",
            lobby,
        }),
    ))
}

/// Join a lobby. The body is optional; send `{"password": ...}` for
/// protected lobbies.
///
/// # Errors
///
/// - `404 Not Found`: Lobby does not exist
/// - `403 Forbidden`: Lobby is locked
/// - `401 Unauthorized`: Password missing or wrong
/// - `409 Conflict`: Lobby is full
pub async fn join_lobby(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(lobby_id): Path<LobbyId>,
    body: Bytes,
) -> ApiResult<Json<LobbyResponse>> {
    let payload: JoinPayload = if body.iter().all(u8::is_ascii_whitespace) {
        JoinPayload::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::bad_request(format!("Invalid request body: {e}")))?
    };

    let lobby = state
        .lobby_manager
        .join(lobby_id, &user, payload.password.as_deref())
        .await?;
    Ok(Json(LobbyResponse {
        message: "Joined lobby successfully",
        lobby,
    }))
}

/// Leave a lobby. The host leaving closes it for everyone.
pub async fn leave_lobby(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(lobby_id): Path<LobbyId>,
) -> ApiResult<Json<LeaveResponse>> {
    match state.lobby_manager.leave(lobby_id, &user).await? {
        LeaveResult::Closed => Ok(Json(LeaveResponse {
            message: "Lobby closed",
            lobby: None,
        })),
        LeaveResult::Left(lobby) => {
            withdraw_from_game(&state, lobby_id, user.id).await;
            Ok(Json(LeaveResponse {
                message: "Left lobby successfully",
                lobby: Some(lobby),
            }))
        }
    }
}

pub async fn remove_player(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(lobby_id): Path<LobbyId>,
    Json(payload): Json<RemovePlayerPayload>,
) -> ApiResult<Json<LobbyResponse>> {
    let lobby = state
        .lobby_manager
        .remove_player(lobby_id, &user, payload.player_id)
        .await?;
    withdraw_from_game(&state, lobby_id, payload.player_id).await;
    Ok(Json(LobbyResponse {
        message: "Player removed successfully",
        lobby,
    }))
}

pub async fn update_settings(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(lobby_id): Path<LobbyId>,
    Json(payload): Json<LobbySettings>,
) -> ApiResult<Json<LobbyResponse>> {
    let lobby = state
        .lobby_manager
        .update_settings(lobby_id, &user, payload)
        .await?;
    Ok(Json(LobbyResponse {
        message: "Lobby settings updated",
        lobby,
    }))
}

/// Errors are logged only: the roster change is already committed.
async fn withdraw_from_game(state: &AppState, lobby_id: LobbyId, user_id: UserId) {
    match state.game_manager.withdraw(lobby_id, user_id).await {
        Ok(Some(outcome)) if outcome.status.settlement().is_some() => {
            metrics::rounds_settled_total();
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!("Failed to withdraw user {user_id} from lobby {lobby_id} game: {e}");
        }
    }
}
