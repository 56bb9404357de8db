//! Database module providing PostgreSQL connection pooling, the repository
//! traits, and the PostgreSQL and in-memory stores behind them.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub mod config;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use config::DatabaseConfig;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repository::{GameCreate, GameRepository, LobbyRepository, UserRepository};

/// Database connection pool wrapper
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use cardroom::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), sqlx::Error> {
    ///     let db = Database::new(&DatabaseConfig::development()).await?;
    ///     db.health_check().await
    /// }
    /// ```
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Connect, retrying `connect_retries` times with a fixed delay.
    ///
    /// Returns the last connection error once attempts are exhausted.
    pub async fn connect_with_retry(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let attempts = config.connect_retries.max(1);
        let delay = Duration::from_secs(config.connect_retry_delay_secs);

        let mut attempt = 1;
        loop {
            match Self::new(config).await {
                Ok(db) => {
                    log::info!("Connected to database (attempt {attempt}/{attempts})");
                    return Ok(db);
                }
                Err(e) if attempt < attempts => {
                    log::warn!(
                        "Database connection attempt {attempt}/{attempts} failed: {e}; retrying in {}s",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    log::error!("Database connection failed after {attempts} attempts: {e}");
                    return Err(e);
                }
            }
        }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Check if the database connection is healthy
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Close the database connection pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}
