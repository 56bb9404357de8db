//! HTTP and WebSocket server for the card room.
//!
//! The binary in `main.rs` wires configuration, storage and the managers
//! together; the modules here are public so integration tests can build the
//! router against an in-memory store.

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
