//! Authentication middleware for protected endpoints.
//!
//! The middleware validates the JWT access token from the `Authorization`
//! header, loads the account it names, and injects that [`User`] into request
//! extensions for downstream handlers.
//!
//! # Usage
//!
//! ```rust,no_run
//! use axum::{Router, routing::get, middleware};
//! # use cr_server::api::middleware::auth_middleware;
//! # use cr_server::api::AppState;
//! # async fn handler() {}
//! # let state: AppState = unimplemented!();
//!
//! let protected_routes: Router<AppState> = Router::new()
//!     .route("/api/protected", get(handler))
//!     .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));
//! # let _ = protected_routes;
//! ```
//!
//! # Extracting the User
//!
//! ```rust,no_run
//! use axum::extract::Extension;
//! use cardroom::auth::User;
//!
//! async fn protected_handler(Extension(user): Extension<User>) -> String {
//!     format!("Authenticated as {}", user.username)
//! }
//! # let _ = protected_handler;
//! ```

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use cardroom::auth::{AuthError, User};

use super::{AppState, error::ApiError};

/// Authentication middleware that validates JWT tokens and injects the user.
///
/// # Behavior
///
/// - **Success**: Token valid and account exists → `User` in extensions → next handler
/// - **Missing header or not `Bearer`**: `401` "Not authorized, no token"
/// - **Invalid/expired token or deleted account**: `401` "Not authorized, token failed"
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Not authorized, no token"))?;

    let user = authenticate(&state, token).await?;
    request.extensions_mut().insert(user);
    Ok(next.run(request).await)
}

/// Resolve a bearer token to its account; shared with the WebSocket upgrade.
pub async fn authenticate(state: &AppState, token: &str) -> Result<User, ApiError> {
    match state.auth_manager.authenticate(token).await {
        Ok(user) => Ok(user),
        Err(AuthError::JwtError(_) | AuthError::UserNotFound) => {
            Err(ApiError::unauthorized("Not authorized, token failed"))
        }
        Err(e) => Err(e.into()),
    }
}
