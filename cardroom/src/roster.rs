//! Lobby membership stored as a comma-delimited list of user ids.
//!
//! The lobby row keeps its members in a single `user_ids` column
//! (`"3,7,12"`). Every change is a read-modify-write of that column, so the
//! storage layer always locks the row before calling into [`Roster`].

use crate::auth::UserId;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A roster column that does not decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid roster entry: {0:?}")]
pub struct RosterParseError(pub String);

/// Ordered, duplicate-free lobby membership. Join order is preserved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster(Vec<UserId>);

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roster holding only the lobby host.
    pub fn with_host(host: UserId) -> Self {
        Self(vec![host])
    }

    /// Decode a stored column. Blank entries are skipped and repeated ids
    /// keep their first position.
    pub fn parse(stored: &str) -> Result<Self, RosterParseError> {
        let mut roster = Self::new();
        for token in stored.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let id = token
                .parse::<UserId>()
                .map_err(|_| RosterParseError(token.to_string()))?;
            roster.insert(id);
        }
        Ok(roster)
    }

    pub fn contains(&self, user_id: UserId) -> bool {
        self.0.contains(&user_id)
    }

    /// Append a member. Returns `false` if already present.
    pub fn insert(&mut self, user_id: UserId) -> bool {
        if self.contains(user_id) {
            return false;
        }
        self.0.push(user_id);
        true
    }

    /// Drop a member. Returns `false` if they were not present.
    pub fn remove(&mut self, user_id: UserId) -> bool {
        let before = self.0.len();
        self.0.retain(|&id| id != user_id);
        self.0.len() != before
    }

    pub fn ids(&self) -> &[UserId] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Roster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}
