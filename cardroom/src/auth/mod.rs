//! Authentication module providing registration, login and token checks.
//!
//! This module implements:
//! - Argon2id password hashing (shared with lobby passwords)
//! - HS256 JWT access tokens carrying the user's role
//! - Per-email failed-login lockout
//!
//! ## Example
//!
//! ```no_run
//! use cardroom::auth::{AuthManager, RegisterRequest};
//! use cardroom::db::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let auth = AuthManager::new(
//!         Arc::new(MemoryStore::new()),
//!         "a_jwt_secret_of_at_least_32_bytes!".to_string(),
//!     );
//!
//!     let session = auth
//!         .register(RegisterRequest {
//!             username: "player1".to_string(),
//!             email: "player@example.com".to_string(),
//!             password: "SecurePass123".to_string(),
//!             role: None,
//!         })
//!         .await?;
//!     println!("Registered user: {}", session.user.username);
//!     Ok(())
//! }
//! ```

pub mod attempts;
pub mod errors;
pub mod manager;
pub mod models;
pub mod password;

pub use attempts::{AttemptOutcome, LoginAttempts};
pub use errors::{AuthError, AuthResult};
pub use manager::AuthManager;
pub use models::{
    AccessTokenClaims, AuthSession, LoginRequest, NewUser, PlayerStats, PlayerSummary,
    ProfilePicture, ProfileUpdate, RegisterRequest, Role, User, UserCredentials, UserId,
    UserWrite,
};
pub use password::{hash_password, verify_password};
