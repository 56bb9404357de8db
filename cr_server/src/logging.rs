//! Structured logging configuration.
//!
//! Library code logs through the `log` facade; `tracing-subscriber` picks
//! those records up together with the server's own `tracing` events.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging
///
/// Levels come from `RUST_LOG`, defaulting to `info` with sqlx and hyper
/// turned down to warnings.
///
/// # Example
///
/// ```no_run
/// use cr_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    // `try_init` also bridges `log` records into tracing
    if let Err(e) = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
    {
        eprintln!("Logging already initialized: {e}");
        return;
    }

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// # Example
///
/// ```
/// use cr_server::logging::log_security_event;
///
/// log_security_event("failed_login", None, "alice@example.com", "Invalid password attempt");
/// ```
pub fn log_security_event(event_type: &str, user_id: Option<i64>, subject: &str, message: &str) {
    tracing::warn!(
        event_type = event_type,
        user_id = user_id,
        subject = subject,
        "SECURITY: {}",
        message
    );
}

/// Log a completed API request
pub fn log_api_request(request_id: &str, method: &str, path: &str, status_code: u16, duration_ms: u64) {
    if status_code >= 500 {
        tracing::error!(
            request_id = request_id,
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request failed"
        );
    } else {
        tracing::info!(
            request_id = request_id,
            http_method = method,
            http_path = path,
            http_status = status_code,
            duration_ms = duration_ms,
            "API request completed"
        );
    }
}
