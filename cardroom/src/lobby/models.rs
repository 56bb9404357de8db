//! Lobby data models.

use crate::auth::{PlayerSummary, UserId, verify_password};
use crate::roster::Roster;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Lobby ID type
pub type LobbyId = i64;

/// Skill band advertised by a lobby.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpertiseLevel {
    #[default]
    Beginner,
    Intermediate,
    Expert,
}

impl ExpertiseLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ExpertiseLevel::Beginner => "beginner",
            ExpertiseLevel::Intermediate => "intermediate",
            ExpertiseLevel::Expert => "expert",
        }
    }
}

impl fmt::Display for ExpertiseLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpertiseLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beginner" => Ok(ExpertiseLevel::Beginner),
            "intermediate" => Ok(ExpertiseLevel::Intermediate),
            "expert" => Ok(ExpertiseLevel::Expert),
            other => Err(format!("unknown expertise level {other:?}")),
        }
    }
}

/// Stored lobby, with the roster resolved to `{id, username}` pairs.
#[derive(Debug, Clone)]
pub struct LobbyRecord {
    pub id: LobbyId,
    pub name: String,
    pub password_hash: Option<String>,
    pub expertise_level: ExpertiseLevel,
    pub owner: PlayerSummary,
    pub roster: Roster,
    /// Members in roster order
    pub players: Vec<PlayerSummary>,
    pub locked: bool,
    pub created_at: DateTime<Utc>,
}

impl LobbyRecord {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.roster.contains(user_id)
    }

    pub fn is_owner(&self, user_id: UserId) -> bool {
        self.owner.id == user_id
    }
}

/// Public lobby payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LobbyView {
    pub id: LobbyId,
    pub name: String,
    pub host: PlayerSummary,
    pub expertise_level: ExpertiseLevel,
    pub has_password: bool,
    pub locked: bool,
    pub players: Vec<PlayerSummary>,
    pub created_at: DateTime<Utc>,
}

impl From<&LobbyRecord> for LobbyView {
    fn from(record: &LobbyRecord) -> Self {
        Self {
            id: record.id,
            name: record.name.clone(),
            host: record.owner.clone(),
            expertise_level: record.expertise_level,
            has_password: record.has_password(),
            locked: record.locked,
            players: record.players.clone(),
            created_at: record.created_at,
        }
    }
}

/// Row to insert for a new lobby. The roster starts as `[owner_id]`.
#[derive(Debug, Clone)]
pub struct NewLobby {
    pub name: String,
    pub password_hash: Option<String>,
    pub expertise_level: ExpertiseLevel,
    pub owner_id: UserId,
}

/// Lobby creation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLobbyRequest {
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub expertise_level: Option<ExpertiseLevel>,
}

/// Owner-editable settings. `None` leaves a field unchanged; an empty
/// password clears it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LobbySettings {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub locked: Option<bool>,
}

/// Settings change ready to persist
#[derive(Debug, Clone, Default)]
pub struct SettingsUpdate {
    pub name: Option<String>,
    /// `Some(None)` clears the password
    pub password_hash: Option<Option<String>>,
    pub locked: Option<bool>,
}

/// Listing sort column. Only these columns can reach SQL.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LobbySort {
    #[default]
    Id,
    Name,
    CreatedAt,
    Expertise,
}

impl LobbySort {
    pub fn column(self) -> &'static str {
        match self {
            LobbySort::Id => "l.lobby_id",
            LobbySort::Name => "l.lobby_name",
            LobbySort::CreatedAt => "l.created_at",
            LobbySort::Expertise => "l.expertise_level",
        }
    }
}

impl FromStr for LobbySort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "id" | "lobby_id" | "lobbyId" => Ok(LobbySort::Id),
            "name" | "lobby_name" | "lobbyName" => Ok(LobbySort::Name),
            "created_at" | "createdAt" => Ok(LobbySort::CreatedAt),
            "expertise" | "expertise_level" | "expertiseLevel" => Ok(LobbySort::Expertise),
            other => Err(format!("cannot sort lobbies by {other:?}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order {other:?}")),
        }
    }
}

/// Which lobbies to include by password protection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PasswordFilter {
    #[default]
    All,
    /// Only password-protected lobbies
    Yes,
    /// Only open-door lobbies
    No,
}

impl PasswordFilter {
    pub fn accepts(self, has_password: bool) -> bool {
        match self {
            PasswordFilter::All => true,
            PasswordFilter::Yes => has_password,
            PasswordFilter::No => !has_password,
        }
    }
}

impl FromStr for PasswordFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(PasswordFilter::All),
            "yes" => Ok(PasswordFilter::Yes),
            "no" => Ok(PasswordFilter::No),
            other => Err(format!("unknown password filter {other:?}")),
        }
    }
}

/// Lobby listing query
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LobbyQuery {
    pub sort: LobbySort,
    pub order: SortOrder,
    pub password: PasswordFilter,
}

/// A join attempt, checked by the store against the locked lobby row.
#[derive(Debug, Clone, Copy)]
pub struct JoinRequest<'a> {
    pub user_id: UserId,
    pub password: Option<&'a str>,
    /// Most players the roster may hold
    pub capacity: usize,
}

impl JoinRequest<'_> {
    /// Why a non-member may not join a lobby in this state, if at all.
    pub fn refusal(
        &self,
        locked: bool,
        password_hash: Option<&str>,
        roster_len: usize,
    ) -> Option<MembershipChange> {
        if locked {
            return Some(MembershipChange::Locked);
        }
        if let Some(hash) = password_hash
            && !self.password.is_some_and(|p| verify_password(p, hash))
        {
            return Some(MembershipChange::IncorrectPassword);
        }
        if roster_len >= self.capacity {
            return Some(MembershipChange::Full);
        }
        None
    }
}

/// Result of a roster change that keeps the lobby alive.
#[derive(Debug, Clone)]
pub enum MembershipChange {
    /// Roster was rewritten
    Updated(LobbyRecord),
    /// Nothing to do (already a member, or not a member)
    Unchanged(LobbyRecord),
    /// Lobby is at capacity
    Full,
    Locked,
    IncorrectPassword,
    NotFound,
}

/// Result of a member leaving
#[derive(Debug, Clone)]
pub enum LeaveOutcome {
    /// The host left; the lobby and its game are gone
    Closed,
    /// A member left; this is the remaining lobby
    Left(LobbyRecord),
    /// The user was not in the lobby
    NotMember,
    NotFound,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sort_accepts_front_end_names() {
        assert_eq!("lobby_name".parse::<LobbySort>().unwrap(), LobbySort::Name);
        assert_eq!("createdAt".parse::<LobbySort>().unwrap(), LobbySort::CreatedAt);
        assert!("password; DROP TABLE users".parse::<LobbySort>().is_err());
    }

    #[test]
    fn test_password_filter() {
        assert!(PasswordFilter::All.accepts(true));
        assert!(PasswordFilter::Yes.accepts(true));
        assert!(!PasswordFilter::Yes.accepts(false));
        assert!(PasswordFilter::No.accepts(false));
        assert!(!PasswordFilter::No.accepts(true));
    }

    #[test]
    fn test_join_refusal_order() {
        let hash = crate::auth::hash_password("letmein1").unwrap();
        let join = |password| JoinRequest {
            user_id: 7,
            password,
            capacity: 2,
        };

        assert!(matches!(
            join(Some("letmein1")).refusal(true, Some(&hash), 0),
            Some(MembershipChange::Locked)
        ));
        assert!(matches!(
            join(None).refusal(false, Some(&hash), 0),
            Some(MembershipChange::IncorrectPassword)
        ));
        assert!(matches!(
            join(Some("letmein1")).refusal(false, Some(&hash), 2),
            Some(MembershipChange::Full)
        ));
        assert!(join(Some("letmein1")).refusal(false, Some(&hash), 1).is_none());
        assert!(join(None).refusal(false, None, 1).is_none());
    }

    #[test]
    fn test_default_query_is_newest_first() {
        let query = LobbyQuery::default();
        assert_eq!(query.sort, LobbySort::Id);
        assert_eq!(query.order, SortOrder::Desc);
        assert_eq!(query.password, PasswordFilter::All);
    }
}
