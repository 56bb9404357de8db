//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use cardroom::db::DatabaseConfig;
use std::net::SocketAddr;

/// Default HTTP bind address
pub const DEFAULT_BIND: &str = "127.0.0.1:3001";

/// Default front-end origin allowed by CORS
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Lobby and table rules
    pub game: GameConfig,
    /// Origin allowed to call the API from a browser
    pub cors_origin: String,
    /// Prometheus exporter address; no exporter when unset
    pub metrics_bind: Option<SocketAddr>,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// Access token lifetime
    pub token_ttl_secs: i64,
    /// Failed logins before an email is locked out
    pub login_max_attempts: u32,
    /// Lockout length
    pub login_lockout_secs: i64,
}

/// Lobby and table rules
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Players allowed in one lobby
    pub lobby_max_players: usize,
    /// Chips each player starts a table with
    pub starting_money: i64,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or unparseable
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_env_required_or("SERVER_BIND", DEFAULT_BIND)?,
        };

        let defaults = DatabaseConfig::default();
        let database_url = database_url_override
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or(defaults.database_url);

        let database = DatabaseConfig {
            database_url,
            max_connections: parse_env_or("DB_MAX_CONNECTIONS", defaults.max_connections),
            min_connections: parse_env_or("DB_MIN_CONNECTIONS", defaults.min_connections),
            connection_timeout_secs: parse_env_or(
                "DB_CONNECTION_TIMEOUT_SECS",
                defaults.connection_timeout_secs,
            ),
            idle_timeout_secs: parse_env_or("DB_IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs),
            max_lifetime_secs: parse_env_or("DB_MAX_LIFETIME_SECS", defaults.max_lifetime_secs),
            connect_retries: parse_env_or("DB_CONNECT_RETRIES", defaults.connect_retries),
            connect_retry_delay_secs: parse_env_or(
                "DB_CONNECT_RETRY_DELAY_SECS",
                defaults.connect_retry_delay_secs,
            ),
        };

        // Security configuration (REQUIRED)
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;

        let security = SecurityConfig {
            jwt_secret,
            token_ttl_secs: parse_env_or("TOKEN_TTL_SECS", 3600),
            login_max_attempts: parse_env_or("LOGIN_MAX_ATTEMPTS", 3),
            login_lockout_secs: parse_env_or("LOGIN_LOCKOUT_SECS", 60),
        };

        let game = GameConfig {
            lobby_max_players: parse_env_or("LOBBY_MAX_PLAYERS", 6),
            starting_money: parse_env_or("GAME_STARTING_MONEY", 1000),
        };

        let cors_origin =
            std::env::var("CORS_ORIGIN").unwrap_or_else(|_| DEFAULT_CORS_ORIGIN.to_string());

        let metrics_bind = match std::env::var("METRICS_BIND") {
            Ok(value) if !value.trim().is_empty() => {
                Some(value.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "METRICS_BIND".to_string(),
                    reason: format!("{value:?} is not an IP:PORT address"),
                })?)
            }
            _ => None,
        };

        Ok(ServerConfig {
            bind,
            database,
            security,
            game,
            cors_origin,
            metrics_bind,
        })
    }

    /// Validate configuration after loading
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting found
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.security.token_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                var: "TOKEN_TTL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.security.login_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                var: "LOGIN_MAX_ATTEMPTS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.security.login_lockout_secs <= 0 {
            return Err(ConfigError::Invalid {
                var: "LOGIN_LOCKOUT_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if !(2..=6).contains(&self.game.lobby_max_players) {
            return Err(ConfigError::Invalid {
                var: "LOBBY_MAX_PLAYERS".to_string(),
                reason: "Must be between 2 and 6".to_string(),
            });
        }

        if self.game.starting_money < 0 {
            return Err(ConfigError::Invalid {
                var: "GAME_STARTING_MONEY".to_string(),
                reason: "Must not be negative".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed DB_MAX_CONNECTIONS ({})",
                    self.database.max_connections
                ),
            });
        }

        if self.database.connect_retries == 0 {
            return Err(ConfigError::Invalid {
                var: "DB_CONNECT_RETRIES".to_string(),
                reason: "Must be at least 1".to_string(),
            });
        }

        if self.cors_origin.trim().is_empty() {
            return Err(ConfigError::Invalid {
                var: "CORS_ORIGIN".to_string(),
                reason: "Must not be empty".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Like [`parse_env_or`], but a set-and-unparseable value is an error.
fn parse_env_required_or<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let value = std::env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|_| ConfigError::Invalid {
        var: key.to_string(),
        reason: format!("{value:?} could not be parsed"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> ServerConfig {
        ServerConfig {
            bind: "127.0.0.1:3001".parse().unwrap(),
            database: DatabaseConfig {
                database_url: "test".to_string(),
                ..DatabaseConfig::default()
            },
            security: SecurityConfig {
                jwt_secret: "a".repeat(32),
                token_ttl_secs: 3600,
                login_max_attempts: 3,
                login_lockout_secs: 60,
            },
            game: GameConfig {
                lobby_max_players: 6,
                starting_money: 1000,
            },
            cors_origin: DEFAULT_CORS_ORIGIN.to_string(),
            metrics_bind: None,
        }
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Use openssl".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("JWT_SECRET"));
        assert!(msg.contains("Use openssl"));
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_short_secret() {
        let mut config = valid_config();
        config.security.jwt_secret = "too_short".to_string();

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "JWT_SECRET"));
    }

    #[test]
    fn test_config_validation_lobby_size() {
        let mut config = valid_config();
        config.game.lobby_max_players = 7;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "LOBBY_MAX_PLAYERS"));

        config.game.lobby_max_players = 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_pool_bounds() {
        let mut config = valid_config();
        config.database.min_connections = config.database.max_connections + 1;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "DB_MIN_CONNECTIONS"));
    }
}
