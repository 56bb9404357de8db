//! Lobbies: creation, listing, membership, kicking and settings.
//!
//! Membership lives in the lobby's delimited roster column. The manager
//! decides who may do what; the store performs each roster change as one
//! locked read-modify-write; the hub tells the room afterwards.

pub mod errors;
pub mod manager;
pub mod models;

pub use errors::{LobbyError, LobbyResult};
pub use manager::{LeaveResult, LobbyManager, MAX_CHAT_LEN, MAX_LOBBY_PLAYERS};
pub use models::{
    CreateLobbyRequest, ExpertiseLevel, JoinRequest, LeaveOutcome, LobbyId, LobbyQuery,
    LobbyRecord, LobbySettings, LobbySort, LobbyView, MembershipChange, NewLobby, PasswordFilter,
    SettingsUpdate, SortOrder,
};
