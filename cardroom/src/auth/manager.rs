//! Authentication manager implementation.

use super::{
    attempts::{AttemptOutcome, LoginAttempts},
    errors::{AuthError, AuthResult},
    models::{
        AccessTokenClaims, AuthSession, LoginRequest, NewUser, PlayerStats, ProfilePicture,
        ProfileUpdate, RegisterRequest, Role, User, UserId, UserWrite,
    },
    password::{hash_password, verify_password},
};
use crate::db::UserRepository;
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::sync::Arc;

/// Authentication manager
pub struct AuthManager {
    users: Arc<dyn UserRepository>,
    jwt_secret: String,
    token_ttl: Duration,
    attempts: LoginAttempts,
}

impl AuthManager {
    /// Create a new authentication manager with a one-hour token lifetime and
    /// a three-strike, one-minute login lockout.
    ///
    /// # Arguments
    ///
    /// * `users` - Account storage
    /// * `jwt_secret` - Secret key for JWT signing
    pub fn new(users: Arc<dyn UserRepository>, jwt_secret: String) -> Self {
        Self {
            users,
            jwt_secret,
            token_ttl: Duration::hours(1),
            attempts: LoginAttempts::new(3, Duration::seconds(60)),
        }
    }

    /// Override how long issued tokens stay valid.
    pub fn with_token_ttl(mut self, ttl: Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Override the failed-login budget and lockout length.
    pub fn with_login_policy(mut self, max_attempts: u32, lockout: Duration) -> Self {
        self.attempts = LoginAttempts::new(max_attempts, lockout);
        self
    }

    /// Register a new user
    ///
    /// # Errors
    ///
    /// * `AuthError::MissingFields` - A field is blank
    /// * `AuthError::InvalidUsername` / `InvalidEmail` / `WeakPassword` - Format checks
    /// * `AuthError::RoleNotAllowed` - Unknown role or `admin`
    /// * `AuthError::EmailTaken` - Checked before the username
    /// * `AuthError::UsernameTaken` - Username already exists
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<AuthSession> {
        let username = request.username.trim();
        let email = normalize_email(&request.email);

        if username.is_empty() || email.is_empty() || request.password.is_empty() {
            return Err(AuthError::MissingFields);
        }
        validate_username(username)?;
        validate_email(&email)?;
        validate_password(&request.password)?;
        let role = requested_role(request.role.as_deref())?;

        let password_hash = hash_password(&request.password)?;
        let write = self
            .users
            .create_user(NewUser {
                username: username.to_string(),
                email,
                password_hash,
                role,
            })
            .await?;

        let user = saved(write)?;
        log::info!("Registered user {} ({}) as {}", user.id, user.username, user.role);

        let token = self.issue_token(&user)?;
        Ok(AuthSession { user, token })
    }

    /// Login a user by email and password
    ///
    /// # Errors
    ///
    /// * `AuthError::Locked` - Too many recent failures for this email
    /// * `AuthError::InvalidCredentials` - Unknown email or wrong password
    pub async fn login(&self, request: LoginRequest) -> AuthResult<AuthSession> {
        let email = normalize_email(&request.email);
        if email.is_empty() || request.password.is_empty() {
            return Err(AuthError::MissingFields);
        }

        if let Some(retry_after_secs) = self.attempts.locked_for(&email).await {
            return Err(AuthError::Locked { retry_after_secs });
        }

        let credentials = self.users.find_credentials(&email).await?;
        let verified = credentials
            .filter(|c| verify_password(&request.password, &c.password_hash))
            .map(|c| c.user);

        let Some(user) = verified else {
            return Err(match self.attempts.record_failure(&email).await {
                AttemptOutcome::Remaining(remaining_attempts) => {
                    AuthError::InvalidCredentials { remaining_attempts }
                }
                AttemptOutcome::LockedOut { retry_after_secs } => {
                    AuthError::Locked { retry_after_secs }
                }
            });
        };

        self.attempts.clear(&email).await;
        let token = self.issue_token(&user)?;
        Ok(AuthSession { user, token })
    }

    /// Verify an access token
    pub fn verify_token(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        let token_data = decode::<AccessTokenClaims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }

    /// Verify a token and load the account it names.
    pub async fn authenticate(&self, token: &str) -> AuthResult<User> {
        let claims = self.verify_token(token)?;
        self.find_user(claims.sub).await
    }

    /// Current state of an account.
    pub async fn find_user(&self, user_id: UserId) -> AuthResult<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// `true` when nobody holds `username` yet.
    pub async fn check_username(&self, username: &str) -> AuthResult<bool> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::MissingFields);
        }
        Ok(!self.users.username_exists(username).await?)
    }

    pub async fn update_profile_picture(&self, user_id: UserId, picture: &str) -> AuthResult<User> {
        let picture: ProfilePicture = picture
            .parse()
            .map_err(|_| AuthError::InvalidProfilePicture(picture.to_string()))?;

        self.users
            .update_profile_picture(user_id, picture)
            .await?
            .ok_or(AuthError::UserNotFound)
    }

    /// Change username and email. Both stay unique across other accounts.
    pub async fn update_profile(&self, user_id: UserId, update: ProfileUpdate) -> AuthResult<User> {
        let username = update.username.trim();
        let email = normalize_email(&update.email);

        if username.is_empty() || email.is_empty() {
            return Err(AuthError::MissingFields);
        }
        validate_username(username)?;
        validate_email(&email)?;

        let write = self.users.update_profile(user_id, username, &email).await?;
        saved(write)
    }

    /// Public stats for every account.
    pub async fn list_users(&self) -> AuthResult<Vec<PlayerStats>> {
        self.users.list_stats().await
    }

    fn issue_token(&self, user: &User) -> AuthResult<String> {
        let now = Utc::now();
        let claims = AccessTokenClaims {
            sub: user.id,
            username: user.username.clone(),
            role: user.role,
            exp: (now + self.token_ttl).timestamp(),
            iat: now.timestamp(),
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?)
    }
}

fn saved(write: UserWrite) -> AuthResult<User> {
    match write {
        UserWrite::Saved(user) => Ok(user),
        UserWrite::EmailTaken => Err(AuthError::EmailTaken),
        UserWrite::UsernameTaken => Err(AuthError::UsernameTaken),
        UserWrite::NotFound => Err(AuthError::UserNotFound),
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

fn requested_role(role: Option<&str>) -> AuthResult<Role> {
    let Some(name) = role.map(str::trim).filter(|r| !r.is_empty()) else {
        return Ok(Role::User);
    };
    let role: Role = name
        .parse()
        .map_err(|_| AuthError::RoleNotAllowed(name.to_string()))?;
    if !role.is_self_assignable() {
        return Err(AuthError::role_not_allowed(role));
    }
    Ok(role)
}

fn validate_username(username: &str) -> AuthResult<()> {
    let len = username.chars().count();
    if !(3..=20).contains(&len) {
        return Err(AuthError::InvalidUsername(
            "Username must be 3-20 characters".to_string(),
        ));
    }

    if !username.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(AuthError::InvalidUsername(
            "Username can only contain letters, numbers, and underscores".to_string(),
        ));
    }

    Ok(())
}

fn validate_email(email: &str) -> AuthResult<()> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() && !domain.contains('@') => {
            Ok(())
        }
        _ => Err(AuthError::InvalidEmail),
    }
}

fn validate_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < 8 {
        return Err(AuthError::WeakPassword(
            "Password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}
