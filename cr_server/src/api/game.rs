//! Game API handlers.
//!
//! Starting a hand, reading table state, and the two player moves. Moves act
//! for the authenticated user only; the player on turn is enforced by the
//! table rules.
//!
//! # Examples
//!
//! Draw a card:
//! ```bash
//! curl -X POST http://localhost:3001/api/game/hit \
//!   -H "Authorization: Bearer TOKEN" \
//!   -H "Content-Type: application/json" \
//!   -d '{"gameId": 12}'
//! ```

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use cardroom::{
    auth::User,
    game::{GameId, GameStateView, RoundReport, TurnOutcome},
    lobby::LobbyId,
};
use serde::{Deserialize, Serialize};

use super::{AppState, error::ApiResult};
use crate::metrics;

/// Body of a move request. Any other fields the client sends are ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovePayload {
    pub game_id: GameId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveResponse {
    pub success: bool,
    pub game_state: GameStateView,
}

fn move_response(outcome: TurnOutcome) -> Json<MoveResponse> {
    if outcome.status.settlement().is_some() {
        metrics::rounds_settled_total();
    }
    Json(MoveResponse {
        success: true,
        game_state: outcome.state,
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub report: RoundReport,
}

/// Deal a new table for a lobby.
///
/// # Errors
///
/// - `404 Not Found`: Lobby does not exist
/// - `403 Forbidden`: Caller is neither the host nor an admin
/// - `400 Bad Request`: Fewer than two or more than the allowed players
/// - `409 Conflict`: The lobby already has a running game
pub async fn start_game(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Path(lobby_id): Path<LobbyId>,
) -> ApiResult<(StatusCode, Json<GameStateView>)> {
    let game_state = state.game_manager.start(lobby_id, &user).await?;
    metrics::games_started_total();
    Ok((StatusCode::CREATED, Json(game_state)))
}

pub async fn game_for_lobby(
    State(state): State<AppState>,
    Path(lobby_id): Path<LobbyId>,
) -> ApiResult<Json<GameStateView>> {
    Ok(Json(state.game_manager.state_for_lobby(lobby_id).await?))
}

pub async fn get_game(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
) -> ApiResult<Json<GameStateView>> {
    Ok(Json(state.game_manager.state(game_id).await?))
}

/// Take a card.
///
/// # Errors
///
/// - `404 Not Found`: Game does not exist
/// - `403 Forbidden`: Caller is not seated or has stepped back
/// - `400 Bad Request`: Not the caller's turn, or their hand is finished
pub async fn hit(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<MovePayload>,
) -> ApiResult<Json<MoveResponse>> {
    let outcome = state.game_manager.hit(payload.game_id, user.id).await?;
    Ok(move_response(outcome))
}

/// Stand for the rest of the hand.
pub async fn skip(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Json(payload): Json<MovePayload>,
) -> ApiResult<Json<MoveResponse>> {
    let outcome = state.game_manager.skip(payload.game_id, user.id).await?;
    Ok(move_response(outcome))
}

pub async fn check_round_status(
    State(state): State<AppState>,
    Path(game_id): Path<GameId>,
) -> ApiResult<Json<RoundStatusResponse>> {
    let report = state.game_manager.check_round_status(game_id).await?;
    if report.game_ended {
        metrics::rounds_settled_total();
    }
    Ok(Json(RoundStatusResponse {
        success: true,
        report,
    }))
}
