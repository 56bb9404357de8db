//! # Cardroom
//!
//! Lobby, account and table logic for a multiplayer twenty-one card room.
//!
//! The crate keeps "who sits in which lobby" as a comma-delimited roster column
//! and every player's hand as a comma-delimited card column. All multi-statement
//! mutations run inside a single storage transaction, and every committed change
//! is fanned out to the lobby's subscribers through the [`events::LobbyHub`].
//!
//! ## Core Modules
//!
//! - [`cards`]: Ranks, hands and twenty-one totals
//! - [`roster`]: Delimited lobby membership encoding
//! - [`auth`]: Accounts, password hashing, JWT issuing, login lockout
//! - [`lobby`]: Lobby lifecycle (create, join, leave, kick, settings, chat)
//! - [`game`]: Seating, turn rotation, round evaluation and settlement
//! - [`events`]: Room-based fan-out of lobby and game events
//! - [`db`]: PostgreSQL pool, repository traits, PostgreSQL and in-memory stores
//!
//! ## Example
//!
//! ```
//! use cardroom::cards::Hand;
//!
//! let hand = Hand::parse("A,K").unwrap();
//! assert_eq!(hand.total(), 21);
//! ```

pub mod auth;
pub mod cards;
pub mod db;
pub mod events;
pub mod game;
pub mod lobby;
pub mod roster;

pub use cards::{Hand, Rank};
pub use roster::Roster;
