//! Authentication error types.

use super::models::Role;
use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error)]
pub enum AuthError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored row failed to decode
    #[error("Corrupt stored data: {0}")]
    Corrupt(String),

    /// Password hashing failed
    #[error("Password hashing failed")]
    HashingFailed,

    /// A required field was blank
    #[error("All fields are required")]
    MissingFields,

    /// Invalid username format
    #[error("Invalid username: {0}")]
    InvalidUsername(String),

    /// Invalid email format
    #[error("Invalid email address")]
    InvalidEmail,

    /// Password too weak
    #[error("Password too weak: {0}")]
    WeakPassword(String),

    /// Unknown role name, or a role that cannot be self-assigned
    #[error("Role not allowed: {0}")]
    RoleNotAllowed(String),

    /// Unknown avatar name
    #[error("Invalid profile picture: {0}")]
    InvalidProfilePicture(String),

    /// Username already exists
    #[error("Username already exists")]
    UsernameTaken,

    /// Email already exists
    #[error("Email already exists")]
    EmailTaken,

    /// User not found
    #[error("User not found")]
    UserNotFound,

    /// Wrong email or password
    #[error("Invalid email or password. {remaining_attempts} attempt(s) remaining")]
    InvalidCredentials { remaining_attempts: u32 },

    /// Too many failed logins for this email
    #[error("Too many failed login attempts. Try again in {retry_after_secs} seconds")]
    Locked { retry_after_secs: u64 },

    /// JWT token error
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),
}

impl AuthError {
    pub(crate) fn role_not_allowed(role: Role) -> Self {
        AuthError::RoleNotAllowed(role.to_string())
    }

    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database and JWT errors are sanitized to prevent information disclosure
    /// about the internal system structure.
    pub fn client_message(&self) -> String {
        match self {
            AuthError::Database(_) | AuthError::Corrupt(_) | AuthError::HashingFailed => {
                "Internal server error".to_string()
            }
            AuthError::JwtError(_) => "Not authorized, token failed".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
