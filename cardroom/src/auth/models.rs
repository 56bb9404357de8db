//! Account data models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// User ID type
pub type UserId = i64;

/// Account role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Host,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Host => "host",
            Role::Admin => "admin",
        }
    }

    /// May open lobbies.
    pub fn can_host(self) -> bool {
        matches!(self, Role::Host | Role::Admin)
    }

    pub fn is_admin(self) -> bool {
        self == Role::Admin
    }

    /// Roles a visitor may pick for themselves at registration.
    pub fn is_self_assignable(self) -> bool {
        !self.is_admin()
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "host" => Ok(Role::Host),
            "admin" => Ok(Role::Admin),
            other => Err(format!("unknown role {other:?}")),
        }
    }
}

/// Avatar choice shown next to a player's name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfilePicture {
    #[default]
    Default,
    Intermediate,
    Amateur,
    Expert,
}

impl ProfilePicture {
    pub fn as_str(self) -> &'static str {
        match self {
            ProfilePicture::Default => "default",
            ProfilePicture::Intermediate => "intermediate",
            ProfilePicture::Amateur => "amateur",
            ProfilePicture::Expert => "expert",
        }
    }
}

impl fmt::Display for ProfilePicture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProfilePicture {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(ProfilePicture::Default),
            "intermediate" => Ok(ProfilePicture::Intermediate),
            "amateur" => Ok(ProfilePicture::Amateur),
            "expert" => Ok(ProfilePicture::Expert),
            other => Err(format!("unknown profile picture {other:?}")),
        }
    }
}

/// User model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub wins: i64,
    pub losses: i64,
    pub games_played: i64,
    pub profile_picture: ProfilePicture,
    pub created_at: DateTime<Utc>,
}

/// A user together with the stored password hash. Never serialized.
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// Row to insert for a new account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
}

/// Outcome of a write that must keep username and email unique.
#[derive(Debug, Clone)]
pub enum UserWrite {
    Saved(User),
    EmailTaken,
    UsernameTaken,
    NotFound,
}

/// Public leaderboard row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub id: UserId,
    pub username: String,
    pub wins: i64,
    pub losses: i64,
    pub games_played: i64,
    pub profile_picture: ProfilePicture,
}

/// `{id, username}` pair used in lobby and game payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSummary {
    pub id: UserId,
    pub username: String,
}

/// User registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub role: Option<String>,
}

/// User login request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// Username/email change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileUpdate {
    pub username: String,
    pub email: String,
}

/// Issued on successful registration or login
#[derive(Debug, Clone, Serialize)]
pub struct AuthSession {
    pub user: User,
    pub token: String,
}

/// JWT claims for access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: UserId, // User ID
    pub username: String,
    pub role: Role,
    pub exp: i64, // Expiration timestamp
    pub iat: i64, // Issued at timestamp
}
