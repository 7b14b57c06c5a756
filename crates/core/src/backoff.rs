//! Reconnection Backoff
//!
//! Delays grow geometrically with the attempt number and are capped, so the
//! schedule is monotonically non-decreasing.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Hard cap on consecutive reconnection attempts.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 20;

/// A capped exponential delay schedule.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    pub base_ms: u64,
    pub factor: f64,
    pub max_ms: u64,
}

impl Backoff {
    /// Schedule applied after a connection drops uncleanly.
    pub const UNCLEAN_CLOSE: Backoff = Backoff {
        base_ms: 10_000,
        factor: 1.5,
        max_ms: 120_000,
    };

    /// The older, faster schedule for failed connection attempts.
    pub const LEGACY_CONNECT_FAILURE: Backoff = Backoff {
        base_ms: 5_000,
        factor: 1.5,
        max_ms: 60_000,
    };

    /// `min(base * factor^attempt, max)` milliseconds.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let raw = self.base_ms as f64 * self.factor.powi(exponent);
        let capped = if raw.is_finite() {
            raw.min(self.max_ms as f64)
        } else {
            self.max_ms as f64
        };
        Duration::from_millis(capped as u64)
    }
}

/// Why a reconnect is being scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectCause {
    /// An established connection dropped without a clean close.
    UncleanClose,
    /// The connection attempt itself failed.
    ConnectFailure,
}

/// Backoff schedules for each failure path plus the attempt cap.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    pub unclean_close: Backoff,
    pub connect_failure: Backoff,
    pub max_attempts: u32,
}

impl ReconnectPolicy {
    /// Keeps the asymmetric schedules: connect failures retry sooner and cap
    /// lower than dropped connections.
    pub fn legacy() -> Self {
        Self {
            connect_failure: Backoff::LEGACY_CONNECT_FAILURE,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Uses `backoff` for both failure paths.
    pub fn uniform(backoff: Backoff, max_attempts: u32) -> Self {
        Self {
            unclean_close: backoff,
            connect_failure: backoff,
            max_attempts,
        }
    }

    /// The delay before retry number `attempt + 1`, or `None` once the cap
    /// has been reached.
    pub fn next_delay(&self, cause: ReconnectCause, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let schedule = match cause {
            ReconnectCause::UncleanClose => &self.unclean_close,
            ReconnectCause::ConnectFailure => &self.connect_failure,
        };
        Some(schedule.delay(attempt))
    }
}

impl Default for ReconnectPolicy {
    /// One schedule for both failure paths.
    fn default() -> Self {
        Self::uniform(Backoff::UNCLEAN_CLOSE, MAX_RECONNECT_ATTEMPTS)
    }
}
