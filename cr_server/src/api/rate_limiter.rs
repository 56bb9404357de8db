//! Rate limiting for WebSocket client messages.
//!
//! Each connection gets a [`ConnectionLimiter`]: a short burst window and a
//! longer sustained window, both sliding.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Rate limiter using a sliding window algorithm
#[derive(Debug)]
pub struct RateLimiter {
    /// Timestamps of recent requests
    timestamps: VecDeque<Instant>,
    /// Maximum number of requests allowed in the window
    max_requests: usize,
    /// Time window for rate limiting
    window: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter
    ///
    /// # Example
    ///
    /// ```
    /// use cr_server::api::rate_limiter::RateLimiter;
    /// use std::time::Duration;
    ///
    /// // Allow 10 requests per second
    /// let limiter = RateLimiter::new(10, Duration::from_secs(1));
    /// ```
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: VecDeque::with_capacity(max_requests),
            max_requests,
            window,
        }
    }

    /// Burst protection: 10 messages per second
    pub fn burst() -> Self {
        Self::new(10, Duration::from_secs(1))
    }

    /// Sustained usage: 100 messages per minute
    pub fn sustained() -> Self {
        Self::new(100, Duration::from_secs(60))
    }

    /// Record a request if the window has room.
    ///
    /// Returns `true` if the request is allowed, `false` if rate limit exceeded.
    ///
    /// ```
    /// # use cr_server::api::rate_limiter::RateLimiter;
    /// # use std::time::Duration;
    /// let mut limiter = RateLimiter::new(5, Duration::from_secs(1));
    /// for _ in 0..5 {
    ///     assert!(limiter.check());
    /// }
    /// assert!(!limiter.check());
    /// ```
    pub fn check(&mut self) -> bool {
        let now = Instant::now();

        while let Some(ts) = self.timestamps.front() {
            if now.duration_since(*ts) > self.window {
                self.timestamps.pop_front();
            } else {
                break;
            }
        }

        if self.timestamps.len() >= self.max_requests {
            return false;
        }

        self.timestamps.push_back(now);
        true
    }

    /// Time until the oldest request leaves the window, or `None` when empty.
    pub fn reset_in(&self) -> Option<Duration> {
        self.timestamps.front().map(|oldest| {
            let elapsed = Instant::now().duration_since(*oldest);
            self.window.saturating_sub(elapsed)
        })
    }
}

/// Which window rejected a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Burst,
    Sustained,
}

impl LimitKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LimitKind::Burst => "burst",
            LimitKind::Sustained => "sustained",
        }
    }
}

/// A rejected message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitExceeded {
    pub kind: LimitKind,
    pub retry_in: Duration,
}

impl RateLimitExceeded {
    /// Client-facing error text
    pub fn message(&self) -> String {
        match self.kind {
            LimitKind::Burst => "Rate limit exceeded: too many messages per second".to_string(),
            LimitKind::Sustained => format!(
                "Rate limit exceeded: too many messages per minute, retry in {}s",
                self.retry_in.as_secs().max(1)
            ),
        }
    }
}

/// Per-connection limits: burst and sustained windows checked together.
#[derive(Debug)]
pub struct ConnectionLimiter {
    burst: RateLimiter,
    sustained: RateLimiter,
}

impl Default for ConnectionLimiter {
    fn default() -> Self {
        Self::new(RateLimiter::burst(), RateLimiter::sustained())
    }
}

impl ConnectionLimiter {
    pub fn new(burst: RateLimiter, sustained: RateLimiter) -> Self {
        Self { burst, sustained }
    }

    /// Admit one message, or say which window is exhausted.
    pub fn check(&mut self) -> Result<(), RateLimitExceeded> {
        if !self.burst.check() {
            return Err(RateLimitExceeded {
                kind: LimitKind::Burst,
                retry_in: self.burst.reset_in().unwrap_or_default(),
            });
        }
        if !self.sustained.check() {
            return Err(RateLimitExceeded {
                kind: LimitKind::Sustained,
                retry_in: self.sustained.reset_in().unwrap_or_default(),
            });
        }
        Ok(())
    }
}
