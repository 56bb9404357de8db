//! Failed-login tracking with a fixed lockout.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Result of recording a failed login
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Still allowed to try this many more times
    Remaining(u32),
    /// Limit reached; locked for this many seconds
    LockedOut { retry_after_secs: u64 },
}

#[derive(Debug, Clone)]
struct AttemptRecord {
    failures: u32,
    last_failure: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

impl AttemptRecord {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            failures: 0,
            last_failure: now,
            locked_until: None,
        }
    }

    /// Whether the record still affects the next attempt.
    fn is_live(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.locked_until {
            Some(until) => until > now,
            None => now - self.last_failure < window,
        }
    }
}

/// Per-key failure counter. Keys are normalized emails.
///
/// Reaching `max_attempts` failures locks the key for `lockout` and resets
/// the counter, so a fresh budget is available once the lock expires.
/// Unlocked failures older than `lockout` are forgotten, and stale records
/// are pruned on every failure so unknown emails do not pile up.
pub struct LoginAttempts {
    max_attempts: u32,
    lockout: Duration,
    records: RwLock<HashMap<String, AttemptRecord>>,
}

impl LoginAttempts {
    pub fn new(max_attempts: u32, lockout: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout,
            records: RwLock::new(HashMap::new()),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Seconds left on an active lock, if any.
    pub async fn locked_for(&self, key: &str) -> Option<u64> {
        let records = self.records.read().await;
        let until = records.get(key)?.locked_until?;
        remaining_secs(until, Utc::now())
    }

    /// Count a failure for `key`.
    pub async fn record_failure(&self, key: &str) -> AttemptOutcome {
        let now = Utc::now();
        let mut records = self.records.write().await;
        records.retain(|_, record| record.is_live(now, self.lockout));
        let record = records
            .entry(key.to_string())
            .or_insert_with(|| AttemptRecord::new(now));

        if let Some(until) = record.locked_until {
            if let Some(secs) = remaining_secs(until, now) {
                return AttemptOutcome::LockedOut {
                    retry_after_secs: secs,
                };
            }
            record.locked_until = None;
        }

        record.failures += 1;
        record.last_failure = now;
        if record.failures >= self.max_attempts {
            record.failures = 0;
            let until = now + self.lockout;
            record.locked_until = Some(until);
            log::warn!("Login locked for {key} until {until}");
            return AttemptOutcome::LockedOut {
                retry_after_secs: remaining_secs(until, now).unwrap_or(0),
            };
        }

        AttemptOutcome::Remaining(self.max_attempts - record.failures)
    }

    /// Forget all failures for `key` after a successful login.
    pub async fn clear(&self, key: &str) {
        self.records.write().await.remove(key);
    }

    #[cfg(test)]
    async fn tracked(&self) -> usize {
        self.records.read().await.len()
    }
}

fn remaining_secs(until: DateTime<Utc>, now: DateTime<Utc>) -> Option<u64> {
    let millis = (until - now).num_milliseconds();
    if millis <= 0 {
        return None;
    }
    Some((millis as u64).div_ceil(1000))
}
