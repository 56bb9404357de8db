//! HTTP/WebSocket API for the card room.
//!
//! This module provides the REST and WebSocket API: accounts, lobbies, the
//! blackjack tables and a real-time event stream per lobby.
//!
//! # Architecture
//!
//! The API is built with:
//! - **Axum**: Async web framework for HTTP/WebSocket
//! - **Tower**: Middleware for CORS, authentication and request IDs
//! - **JWT**: Bearer tokens issued at register/login
//! - **Lobby hub**: Managers publish events; WebSocket connections subscribe
//!
//! # Modules
//!
//! - [`users`]: Register, login, username checks, profile edits, stats
//! - [`lobbies`]: Create, list, join, leave, kick, settings
//! - [`game`]: Start a table, read its state, hit and stand
//! - [`websocket`]: Lobby event stream and chat
//! - [`middleware`]: Authentication middleware for protected endpoints
//!
//! # Endpoints Overview
//!
//! ## Public
//! - `GET /health` - Server health status
//! - `GET /api/users` - Every player's stats
//! - `POST /api/users/register`, `POST /api/users/login`
//! - `GET /api/users/check-username/{username}`
//! - `GET /api/lobbies`, `GET /api/lobbies/{id}`
//!
//! ## Authenticated
//! - `PUT /api/users/update-profile-picture`, `PUT /api/users/update-profile`
//! - `POST /api/lobbies/create`, `POST /api/lobbies/join/{id}`,
//!   `POST /api/lobbies/leave/{id}`, `POST /api/lobbies/{id}/remove-player`,
//!   `PUT /api/lobbies/{id}/settings`
//! - `POST /api/game/start/{lobby_id}`, `GET /api/game/lobby/{lobby_id}`,
//!   `GET /api/game/{game_id}`, `POST /api/game/hit`, `POST /api/game/skip`,
//!   `GET /api/game/check-round-status/{game_id}`
//!
//! ## WebSocket
//! - `GET /ws?token=<jwt>` - Lobby event stream
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use axum::http::HeaderValue;
//! use cr_server::api::{AppState, create_router};
//! # async fn example(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
//! let app = create_router(state, HeaderValue::from_static("http://localhost:5173"));
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:3001").await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod game;
pub mod lobbies;
pub mod middleware;
pub mod rate_limiter;
pub mod request_id;
pub mod users;
pub mod websocket;

use axum::{
    Router,
    extract::State,
    http::{
        HeaderValue, Method, StatusCode, Uri,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    response::{IntoResponse, Json},
    routing::{get, post, put},
};
use cardroom::{
    auth::AuthManager, db::Database, events::LobbyHub, game::GameManager, lobby::LobbyManager,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Application state shared across all HTTP handlers and WebSocket connections.
///
/// Cloned per request; every field is behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub auth_manager: Arc<AuthManager>,
    pub lobby_manager: Arc<LobbyManager>,
    pub game_manager: Arc<GameManager>,
    pub hub: Arc<LobbyHub>,
    /// `None` when running on the in-memory store
    pub database: Option<Database>,
}

/// Create the complete API router with all endpoints and middleware.
///
/// Requests from `cors_origin` may send credentials with GET, POST, PUT and
/// DELETE; other origins are refused by the browser.
pub fn create_router(state: AppState, cors_origin: HeaderValue) -> Router {
    let public_routes = Router::new()
        .route("/api/users", get(users::list_users))
        .route("/api/users/register", post(users::register))
        .route("/api/users/login", post(users::login))
        .route(
            "/api/users/check-username/{username}",
            get(users::check_username),
        )
        .route("/api/lobbies", get(lobbies::list_lobbies))
        .route("/api/lobbies/{lobby_id}", get(lobbies::get_lobby));

    let protected_routes = Router::new()
        .route(
            "/api/users/update-profile-picture",
            put(users::update_profile_picture),
        )
        .route("/api/users/update-profile", put(users::update_profile))
        .route("/api/lobbies/create", post(lobbies::create_lobby))
        .route("/api/lobbies/join/{lobby_id}", post(lobbies::join_lobby))
        .route("/api/lobbies/leave/{lobby_id}", post(lobbies::leave_lobby))
        .route(
            "/api/lobbies/{lobby_id}/remove-player",
            post(lobbies::remove_player),
        )
        .route(
            "/api/lobbies/{lobby_id}/settings",
            put(lobbies::update_settings),
        )
        .route("/api/game/start/{lobby_id}", post(game::start_game))
        .route("/api/game/lobby/{lobby_id}", get(game::game_for_lobby))
        .route("/api/game/hit", post(game::hit))
        .route("/api/game/skip", post(game::skip))
        .route(
            "/api/game/check-round-status/{game_id}",
            get(game::check_round_status),
        )
        .route("/api/game/{game_id}", get(game::get_game))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::auth_middleware,
        ));

    let cors = CorsLayer::new()
        .allow_origin(cors_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_check))
        // WebSocket route handles its own auth via query parameter
        .route("/ws", get(websocket::websocket_handler))
        .merge(public_routes)
        .merge(protected_routes)
        .fallback(route_not_found)
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .layer(cors)
        .with_state(state)
}

async fn route_not_found(method: Method, uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": format!("Route not found: {method} {uri}"),
        })),
    )
}

/// Health check endpoint for monitoring and load balancers.
///
/// Returns `200 OK` when the store is reachable, `503 Service Unavailable`
/// otherwise. The in-memory store is always healthy.
///
/// # Example
///
/// ```bash
/// curl http://localhost:3001/health
/// # {"status":"healthy","storage":"postgres","database":true,"timestamp":"2026-10-19T10:30:00Z"}
/// ```
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (storage, db_healthy) = match &state.database {
        Some(db) => ("postgres", db.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if db_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if db_healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage,
        "database": db_healthy,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
