//! Database configuration module.
//!
//! Provides configuration structures for database connection management.
//! Values are read from the environment by the server's config layer.

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub database_url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    pub min_connections: u32,

    /// Connection timeout in seconds
    pub connection_timeout_secs: u64,

    /// Idle connection timeout in seconds
    pub idle_timeout_secs: u64,

    /// Maximum connection lifetime in seconds
    pub max_lifetime_secs: u64,

    /// Attempts made before giving up on the initial connection
    pub connect_retries: u32,

    /// Pause between connection attempts in seconds
    pub connect_retry_delay_secs: u64,
}

impl DatabaseConfig {
    /// Create a default configuration for development
    ///
    /// Uses `postgres://postgres@localhost/cardroom` as the database URL
    pub fn development() -> Self {
        Self {
            database_url: "postgres://postgres@localhost/cardroom".to_string(),
            max_connections: 20,
            min_connections: 2,
            connection_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
            connect_retries: 5,
            connect_retry_delay_secs: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self::development()
    }
}
