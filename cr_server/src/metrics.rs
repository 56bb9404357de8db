//! Prometheus metrics for monitoring card room health.
//!
//! Metrics are recorded through the `metrics` facade and exported in
//! Prometheus text format when an exporter is installed. Without one, every
//! call here is a no-op.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use cr_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::http_requests_total("POST", 200);
//! metrics::websocket_connected();
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Metrics will be available at `http://<addr>/metrics`.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
pub fn http_requests_total(method: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration in milliseconds.
pub fn http_request_duration_ms(method: &str, duration_ms: f64) {
    metrics::histogram!("http_request_duration_ms",
        "method" => method.to_string()
    )
    .record(duration_ms);
}

// ============================================================================
// WebSocket Metrics
// ============================================================================

/// A WebSocket connection opened.
pub fn websocket_connected() {
    metrics::gauge!("websocket_connections_active").increment(1.0);
    metrics::counter!("websocket_connections_total").increment(1);
}

/// A WebSocket connection closed.
pub fn websocket_disconnected() {
    metrics::gauge!("websocket_connections_active").decrement(1.0);
}

/// Increment WebSocket messages received counter.
pub fn websocket_messages_received() {
    metrics::counter!("websocket_messages_received").increment(1);
}

/// Increment WebSocket messages sent counter.
pub fn websocket_messages_sent() {
    metrics::counter!("websocket_messages_sent").increment(1);
}

// ============================================================================
// Game Metrics
// ============================================================================

/// Count a lobby event delivered to one connection, labelled by its wire name.
pub fn lobby_events_delivered(event: &'static str) {
    metrics::counter!("lobby_events_delivered_total", "event" => event).increment(1);
}

/// Increment settled-hands counter.
pub fn rounds_settled_total() {
    metrics::counter!("rounds_settled_total").increment(1);
}

/// Increment games-started counter.
pub fn games_started_total() {
    metrics::counter!("games_started_total").increment(1);
}

// ============================================================================
// Auth Metrics
// ============================================================================

/// Increment login attempts counter.
pub fn login_attempts_total(success: bool) {
    metrics::counter!("login_attempts_total",
        "success" => success.to_string()
    )
    .increment(1);
}

// ============================================================================
// Rate Limiting Metrics
// ============================================================================

/// Increment rate limit hits counter.
pub fn rate_limit_hits_total(limit: &'static str) {
    metrics::counter!("rate_limit_hits_total", "limit" => limit).increment(1);
}
