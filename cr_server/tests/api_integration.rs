//! HTTP integration tests for the card room API.
//!
//! The router runs against the in-memory store, so no database is required.

use axum::body::Body;
use axum::http::{HeaderValue, Request, StatusCode, header};
use cardroom::auth::AuthManager;
use cardroom::db::MemoryStore;
use cardroom::events::{LobbyHub, RoomMessage};
use cardroom::game::GameManager;
use cardroom::lobby::LobbyManager;
use cr_server::api::{AppState, create_router};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::mpsc;
use tower::ServiceExt; // For `oneshot` method
use uuid::Uuid;

const JWT_SECRET: &str = "test_secret_key_for_testing_only_32b";
const ORIGIN: &str = "http://localhost:5173";

struct TestServer {
    app: axum::Router,
    hub: Arc<LobbyHub>,
}

fn create_test_server() -> TestServer {
    let store = Arc::new(MemoryStore::new());
    let hub = Arc::new(LobbyHub::new());

    let state = AppState {
        auth_manager: Arc::new(AuthManager::new(store.clone(), JWT_SECRET.to_string())),
        lobby_manager: Arc::new(LobbyManager::new(store.clone(), hub.clone())),
        game_manager: Arc::new(
            GameManager::new(store.clone(), store, hub.clone()).with_rng_seed(11),
        ),
        hub: hub.clone(),
        database: None,
    };

    TestServer {
        app: create_router(state, HeaderValue::from_static(ORIGIN)),
        hub,
    }
}

impl TestServer {
    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send("GET", uri, token, None).await
    }

    async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> (StatusCode, Value) {
        self.send("POST", uri, token, Some(body)).await
    }

    async fn put(&self, uri: &str, token: &str, body: Value) -> (StatusCode, Value) {
        self.send("PUT", uri, Some(token), Some(body)).await
    }

    /// Register and return `(user_id, token)`
    async fn register(&self, username: &str, role: &str) -> (i64, String) {
        let (status, body) = self
            .post(
                "/api/users/register",
                None,
                json!({
                    "username": username,
                    "email": format!("{username}@example.com"),
                    "password": "Password123",
                    "role": role,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "register {username}: {body}");
        (
            body["user"]["id"].as_i64().unwrap(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn create_lobby(&self, token: &str, body: Value) -> i64 {
        let (status, body) = self.post("/api/lobbies/create", Some(token), body).await;
        assert_eq!(status, StatusCode::CREATED, "create lobby: {body}");
        body["lobby"]["id"].as_i64().unwrap()
    }

    async fn listen(&self, lobby_id: i64) -> mpsc::Receiver<RoomMessage> {
        let (tx, rx) = mpsc::channel(64);
        self.hub.subscribe(lobby_id, Uuid::new_v4(), 0, tx).await;
        rx
    }
}

fn drain(rx: &mut mpsc::Receiver<RoomMessage>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        names.push(msg.event.name());
    }
    names
}

/// Id of the player on turn who can still act, if any
fn on_turn(state: &Value) -> Option<i64> {
    let turn = state["currentTurn"].as_i64()?;
    state["players"]
        .as_array()?
        .iter()
        .find(|p| {
            p["seatPosition"].as_i64() == Some(turn)
                && p["isActive"] == json!(true)
                && p["steppedBack"] == json!(false)
                && p["total"].as_u64().is_some_and(|t| t < 21)
        })
        .and_then(|p| p["id"].as_i64())
}

// ============================================================================
// Health and Routing Tests
// ============================================================================

#[tokio::test]
async fn test_health_check_endpoint() {
    let server = create_test_server();

    let (status, body) = server.get("/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn test_unknown_route_returns_json_404() {
    let server = create_test_server();

    let (status, body) = server.get("/api/nowhere", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["message"], "Route not found: GET /api/nowhere");
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    let server = create_test_server();

    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-me")
        .body(Body::empty())
        .unwrap();
    let response = server.app.clone().oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-me");
}

#[tokio::test]
async fn test_cors_allows_configured_origin_only() {
    let server = create_test_server();

    let preflight = |origin: &'static str| {
        Request::builder()
            .method("OPTIONS")
            .uri("/api/lobbies")
            .header(header::ORIGIN, origin)
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap()
    };

    let response = server.app.clone().oneshot(preflight(ORIGIN)).await.unwrap();
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
        ORIGIN
    );
    assert_eq!(
        response.headers()[header::ACCESS_CONTROL_ALLOW_CREDENTIALS],
        "true"
    );

    let response = server
        .app
        .clone()
        .oneshot(preflight("http://evil.example"))
        .await
        .unwrap();
    assert!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none()
    );
}

// ============================================================================
// Account Tests
// ============================================================================

#[tokio::test]
async fn test_register_and_login() {
    let server = create_test_server();
    let (user_id, token) = server.register("alice", "user").await;
    assert!(!token.is_empty());

    let (status, body) = server
        .post(
            "/api/users/login",
            None,
            json!({"email": "ALICE@example.com", "password": "Password123"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Login successful");
    assert_eq!(body["user"]["id"], user_id);
    assert_eq!(body["user"]["gamesPlayed"], 0);
    assert!(body["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn test_registration_rejections() {
    let server = create_test_server();
    server.register("bob", "user").await;

    let attempts = [
        json!({"username": "bob", "email": "other@example.com", "password": "Password123"}),
        json!({"username": "bobby", "email": "bob@example.com", "password": "Password123"}),
        json!({"username": "eve", "email": "eve@example.com", "password": "Password123", "role": "admin"}),
        json!({"username": "", "email": "x@example.com", "password": "Password123"}),
        json!({"username": "weak", "email": "weak@example.com", "password": "short"}),
    ];
    for attempt in attempts {
        let (status, body) = server.post("/api/users/register", None, attempt).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert!(body["error"].is_string());
    }
}

#[tokio::test]
async fn test_repeated_failed_logins_lock_the_email() {
    let server = create_test_server();
    server.register("carol", "user").await;

    let wrong = json!({"email": "carol@example.com", "password": "WrongPass999"});
    let (status, _) = server.post("/api/users/login", None, wrong.clone()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mut last = StatusCode::OK;
    for _ in 0..4 {
        last = server.post("/api/users/login", None, wrong.clone()).await.0;
    }
    assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);

    // The right password is refused while locked
    let (status, _) = server
        .post(
            "/api/users/login",
            None,
            json!({"email": "carol@example.com", "password": "Password123"}),
        )
        .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_check_username_and_profile_updates() {
    let server = create_test_server();
    let (_, token) = server.register("dave", "user").await;

    let (_, body) = server.get("/api/users/check-username/dave", None).await;
    assert_eq!(body["isAvailable"], false);
    let (_, body) = server.get("/api/users/check-username/erin", None).await;
    assert_eq!(body["isAvailable"], true);

    let (status, body) = server
        .put(
            "/api/users/update-profile",
            &token,
            json!({"username": "david", "email": "david@example.com"}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["user"]["username"], "david");

    let (status, _) = server
        .put(
            "/api/users/update-profile-picture",
            &token,
            json!({"profilePicture": "no-such-picture"}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = server.get("/api/users", None).await;
    assert_eq!(status, StatusCode::OK);
    let users = body.as_array().unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["username"], "david");
    assert!(users[0].get("email").is_none());
}

#[tokio::test]
async fn test_protected_routes_require_a_valid_token() {
    let server = create_test_server();

    let (status, body) = server
        .post("/api/lobbies/create", None, json!({"name": "No token"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not authorized, no token");

    let (status, body) = server
        .post(
            "/api/lobbies/create",
            Some("not-a-jwt"),
            json!({"name": "Bad token"}),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "Not authorized, token failed");
}

// ============================================================================
// Lobby Tests
// ============================================================================

#[tokio::test]
async fn test_only_hosts_create_lobbies() {
    let server = create_test_server();
    let (_, player) = server.register("frank", "user").await;
    let (_, host) = server.register("grace", "host").await;

    let (status, _) = server
        .post("/api/lobbies/create", Some(&player), json!({"name": "Mine"}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .post("/api/lobbies/create", Some(&host), json!({"name": "   "}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let lobby_id = server.create_lobby(&host, json!({"name": "Grace's table"})).await;
    let (status, body) = server.get(&format!("/api/lobbies/{lobby_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["host"]["username"], "grace");
    assert_eq!(body["hasPassword"], false);
    assert!(body.get("passwordHash").is_none());

    let (status, _) = server.get("/api/lobbies/9999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_lobby_listing_filters() {
    let server = create_test_server();
    let (_, host) = server.register("heidi", "host").await;

    server.create_lobby(&host, json!({"name": "Open"})).await;
    server
        .create_lobby(&host, json!({"name": "Closed", "password": "secret"}))
        .await;

    let (_, body) = server
        .get("/api/lobbies?includePasswordProtected=no", None)
        .await;
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Open"]);

    let (_, body) = server.get("/api/lobbies?sortBy=name&order=asc", None).await;
    let names: Vec<_> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["Closed", "Open"]);

    let (status, _) = server.get("/api/lobbies?sortBy=password_hash", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_join_password_and_lock() {
    let server = create_test_server();
    let (_, host) = server.register("ivan", "host").await;
    let (_, guest) = server.register("judy", "user").await;
    let lobby_id = server
        .create_lobby(&host, json!({"name": "Private", "password": "secret"}))
        .await;
    let join = format!("/api/lobbies/join/{lobby_id}");

    // No body at all
    let (status, _) = server.send("POST", &join, Some(&guest), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = server
        .post(&join, Some(&guest), json!({"password": "wrong"}))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let mut rx = server.listen(lobby_id).await;
    let (status, body) = server
        .post(&join, Some(&guest), json!({"password": "secret"}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["lobby"]["players"].as_array().unwrap().len(), 2);
    assert_eq!(drain(&mut rx), vec!["player_joined"]);

    let (status, body) = server
        .put(
            &format!("/api/lobbies/{lobby_id}/settings"),
            &host,
            json!({"locked": true, "password": ""}),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["lobby"]["locked"], true);
    assert_eq!(body["lobby"]["hasPassword"], false);
    assert_eq!(drain(&mut rx), vec!["lobby_updated"]);

    let (_, late) = server.register("ken", "user").await;
    let (status, _) = server.post(&join, Some(&late), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = server
        .put(
            &format!("/api/lobbies/{lobby_id}/settings"),
            &guest,
            json!({"locked": false}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_remove_player_and_host_leave() {
    let server = create_test_server();
    let (host_id, host) = server.register("liam", "host").await;
    let (guest_id, guest) = server.register("mia", "user").await;
    let lobby_id = server.create_lobby(&host, json!({"name": "Kick"})).await;
    server
        .post(&format!("/api/lobbies/join/{lobby_id}"), Some(&guest), json!({}))
        .await;
    let remove = format!("/api/lobbies/{lobby_id}/remove-player");

    let (status, _) = server
        .post(&remove, Some(&guest), json!({"playerId": host_id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = server
        .post(&remove, Some(&host), json!({"playerId": host_id}))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut rx = server.listen(lobby_id).await;
    let (status, body) = server
        .post(&remove, Some(&host), json!({"playerId": guest_id}))
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["lobby"]["players"].as_array().unwrap().len(), 1);
    assert_eq!(drain(&mut rx), vec!["player_left", "removed_from_lobby"]);

    let (status, _) = server
        .post(&remove, Some(&host), json!({"playerId": guest_id}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = server
        .post(&format!("/api/lobbies/leave/{lobby_id}"), Some(&host), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Lobby closed");
    assert_eq!(drain(&mut rx), vec!["host_left_lobby"]);

    let (status, _) = server.get(&format!("/api/lobbies/{lobby_id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ============================================================================
// Game Tests
// ============================================================================

#[tokio::test]
async fn test_game_flow_over_http() {
    let server = create_test_server();
    let (host_id, host) = server.register("nina", "host").await;
    let (guest_id, guest) = server.register("omar", "user").await;
    let lobby_id = server.create_lobby(&host, json!({"name": "Blackjack"})).await;
    let start = format!("/api/game/start/{lobby_id}");

    let (status, _) = server.post(&start, Some(&host), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    server
        .post(&format!("/api/lobbies/join/{lobby_id}"), Some(&guest), json!({}))
        .await;
    let (status, _) = server.post(&start, Some(&guest), json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, mut state) = server.post(&start, Some(&host), json!({})).await;
    assert_eq!(status, StatusCode::CREATED, "{state}");
    assert_eq!(state["currentRound"], 1);
    assert_eq!(state["players"].as_array().unwrap().len(), 2);
    let game_id = state["gameId"].as_i64().unwrap();

    let (status, _) = server.post(&start, Some(&host), json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = server
        .get(&format!("/api/game/lobby/{lobby_id}"), Some(&guest))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, state);

    let token_for = |user_id: i64| {
        assert!(user_id == host_id || user_id == guest_id);
        if user_id == guest_id { guest.as_str() } else { host.as_str() }
    };

    // The player off turn is refused
    if let Some(current) = on_turn(&state) {
        let other = if current == guest_id { &host } else { &guest };
        let (status, _) = server
            .post("/api/game/skip", Some(other), json!({"gameId": game_id}))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // Everyone stands until the hand settles
    let mut ended = false;
    for _ in 0..4 {
        match on_turn(&state) {
            Some(user_id) => {
                let (status, body) = server
                    .post(
                        "/api/game/skip",
                        Some(token_for(user_id)),
                        json!({"gameId": game_id}),
                    )
                    .await;
                assert_eq!(status, StatusCode::OK, "{body}");
                assert_eq!(body["success"], true);
                state = body["gameState"].clone();
            }
            None => {
                let (status, body) = server
                    .get(
                        &format!("/api/game/check-round-status/{game_id}"),
                        Some(&host),
                    )
                    .await;
                assert_eq!(status, StatusCode::OK, "{body}");
                assert_eq!(body["success"], true);
                if body["gameEnded"] == json!(true) {
                    assert_eq!(body["allPlayerResults"].as_array().unwrap().len(), 2);
                    ended = true;
                    break;
                }
                state = body["gameState"].clone();
            }
        }

        let (_, users) = server.get("/api/users", None).await;
        if users
            .as_array()
            .unwrap()
            .iter()
            .all(|u| u["gamesPlayed"] == json!(1))
        {
            ended = true;
            break;
        }
    }
    assert!(ended, "hand never settled");

    let (_, users) = server.get("/api/users", None).await;
    let users = users.as_array().unwrap();
    let wins: i64 = users.iter().map(|u| u["wins"].as_i64().unwrap()).sum();
    let losses: i64 = users.iter().map(|u| u["losses"].as_i64().unwrap()).sum();
    assert_eq!(wins + losses, 2);
    assert!(wins >= 1);

    let (status, _) = server
        .get(&format!("/api/game/{}", game_id + 100), Some(&host))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_leaving_player_is_withdrawn_from_game() {
    let server = create_test_server();
    let (_, host) = server.register("pete", "host").await;
    let (guest_id, guest) = server.register("quinn", "user").await;
    let (third_id, third) = server.register("rosa", "user").await;
    let lobby_id = server.create_lobby(&host, json!({"name": "Three"})).await;
    for token in [&guest, &third] {
        server
            .post(&format!("/api/lobbies/join/{lobby_id}"), Some(token), json!({}))
            .await;
    }
    let (status, state) = server
        .post(&format!("/api/game/start/{lobby_id}"), Some(&host), json!({}))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let game_id = state["gameId"].as_i64().unwrap();

    let (status, body) = server
        .post(&format!("/api/lobbies/leave/{lobby_id}"), Some(&guest), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "Left lobby successfully");

    let (status, state) = server.get(&format!("/api/game/{game_id}"), Some(&host)).await;
    assert_eq!(status, StatusCode::OK);
    let seat = |id: i64| {
        state["players"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["id"] == json!(id))
            .cloned()
    };
    if let Some(left) = seat(guest_id) {
        assert_eq!(left["isActive"], false);
    }
    assert!(seat(third_id).is_some_and(|p| p["isActive"] == json!(true)));

    let (status, _) = server
        .post("/api/game/hit", Some(&guest), json!({"gameId": game_id}))
        .await;
    assert!(
        status == StatusCode::FORBIDDEN || status == StatusCode::BAD_REQUEST,
        "withdrawn player acted: {status}"
    );
}
