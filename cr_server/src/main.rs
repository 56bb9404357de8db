//! Card room server: REST API, lobby WebSocket stream and optional
//! Prometheus exporter, backed by PostgreSQL or an in-memory store.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error};
use axum::http::HeaderValue;
use cardroom::{
    auth::AuthManager,
    db::{Database, GameRepository, LobbyRepository, MemoryStore, PgStore, UserRepository},
    events::LobbyHub,
    game::GameManager,
    lobby::LobbyManager,
};
use chrono::Duration;
use cr_server::{
    api::{self, AppState},
    config::ServerConfig,
    logging, metrics,
};
use log::{info, warn};
use pico_args::Arguments;

const HELP: &str = "\
Run the card room server

USAGE:
  cr_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:3001]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --memory                 Keep all data in process memory instead of PostgreSQL
  -h, --help               Print help information

ENVIRONMENT:
  JWT_SECRET               JWT signing secret (required, 32+ characters)
  CORS_ORIGIN              Allowed browser origin [default: http://localhost:5173]
  METRICS_BIND             Prometheus exporter address (disabled when unset)
  (See .env.example for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    memory: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        return Ok(());
    }

    let args = Args {
        bind: pargs
            .opt_value_from_str("--bind")
            .context("Invalid --bind address")?,
        database_url: pargs
            .opt_value_from_str("--db-url")
            .context("Invalid --db-url")?,
        memory: pargs.contains("--memory"),
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url)?;
    config.validate()?;

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).map_err(anyhow::Error::msg)?;
        info!("Prometheus metrics exported on http://{addr}/metrics");
    }

    let (users, lobbies, games, database) = if args.memory {
        warn!("Running on the in-memory store; all data is lost on shutdown");
        let store = Arc::new(MemoryStore::new());
        repositories(store, None)
    } else {
        info!("Connecting to database");
        let db = Database::connect_with_retry(&config.database)
            .await
            .context("Failed to connect to database")?;
        db.migrate().await.context("Failed to run migrations")?;
        info!("Database connected and migrated");

        let store = Arc::new(PgStore::new(db.pool().clone()));
        repositories(store, Some(db))
    };

    let hub = Arc::new(LobbyHub::new());

    let auth_manager = AuthManager::new(users, config.security.jwt_secret.clone())
        .with_token_ttl(Duration::seconds(config.security.token_ttl_secs))
        .with_login_policy(
            config.security.login_max_attempts,
            Duration::seconds(config.security.login_lockout_secs),
        );
    let lobby_manager = LobbyManager::new(lobbies.clone(), hub.clone())
        .with_max_players(config.game.lobby_max_players);
    let game_manager = GameManager::new(games, lobbies, hub.clone())
        .with_max_players(config.game.lobby_max_players)
        .with_starting_money(config.game.starting_money);

    let state = AppState {
        auth_manager: Arc::new(auth_manager),
        lobby_manager: Arc::new(lobby_manager),
        game_manager: Arc::new(game_manager),
        hub,
        database: database.clone(),
    };

    let cors_origin: HeaderValue = config
        .cors_origin
        .parse()
        .with_context(|| format!("Invalid CORS_ORIGIN {:?}", config.cors_origin))?;
    let app = api::create_router(state, cors_origin);

    info!("Starting HTTP/WebSocket server on {}", config.bind);
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down server...");
    if let Some(db) = database {
        db.close().await;
    }

    Ok(())
}

type Repositories = (
    Arc<dyn UserRepository>,
    Arc<dyn LobbyRepository>,
    Arc<dyn GameRepository>,
    Option<Database>,
);

/// One store serves all three repositories.
fn repositories<S>(store: Arc<S>, database: Option<Database>) -> Repositories
where
    S: UserRepository + LobbyRepository + GameRepository + 'static,
{
    let users: Arc<dyn UserRepository> = store.clone();
    let lobbies: Arc<dyn LobbyRepository> = store.clone();
    let games: Arc<dyn GameRepository> = store;
    (users, lobbies, games, database)
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}
