//! Idle-timeout supervision.
//!
//! [`IdleTimeout`] records the last read or write on a connection and
//! evaluates expiry lazily against the *current* configured timeout, so a
//! timeout changed mid-session applies on the very next check without
//! rescheduling anything. [`IdleSupervisor`] runs those checks for many
//! connections from a task of its own, independent of the connections' I/O
//! paths.

mod supervisor;

use std::{
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

pub use supervisor::{DEFAULT_SWEEP_INTERVAL, IdleSupervisor};
use tokio::time::Instant;

use crate::config::SessionConfig;

/// Result of a single idle check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IdleState {
    /// The configured timeout is zero; expiry is disabled.
    Disabled,
    /// Activity is recent enough; expiry is at least `remaining` away.
    Active {
        /// Time left before the connection would expire.
        remaining: Duration,
    },
    /// The connection just expired. Reported once per expiry.
    Expired {
        /// Time since the last activity.
        idle_for: Duration,
    },
    /// Expiry was already reported; the connection is closing.
    Closing,
}

/// Activity tracker for one connection.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use tokio::time::Instant;
/// use wiresocket::{
///     config::SessionConfig,
///     idle::{IdleState, IdleTimeout},
/// };
///
/// let config = SessionConfig::default();
/// config.set_idle_timeout(Duration::from_secs(5));
/// let idle = IdleTimeout::new(config);
/// let later = idle.last_activity() + Duration::from_secs(6);
/// assert!(matches!(idle.check_at(later), IdleState::Expired { .. }));
/// assert_eq!(idle.check_at(later), IdleState::Closing);
/// ```
#[derive(Debug)]
pub struct IdleTimeout {
    config: SessionConfig,
    origin: Instant,
    last_activity_ms: AtomicU64,
    expired: AtomicBool,
}

impl IdleTimeout {
    /// Start tracking with the current instant as the last activity.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            origin: Instant::now(),
            last_activity_ms: AtomicU64::new(0),
            expired: AtomicBool::new(false),
        }
    }

    /// Record activity now.
    pub fn touch(&self) { self.touch_at(Instant::now()); }

    /// Record activity at `now`. Activity never moves backwards.
    pub fn touch_at(&self, now: Instant) {
        let offset = self.offset_of(now);
        self.last_activity_ms.fetch_max(offset, Ordering::AcqRel);
    }

    /// Instant of the most recent recorded activity.
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.origin + Duration::from_millis(self.last_activity_ms.load(Ordering::Acquire))
    }

    /// Timeout currently in force.
    #[must_use]
    pub fn timeout(&self) -> Duration { self.config.idle_timeout() }

    /// Evaluate expiry now.
    pub fn check(&self) -> IdleState { self.check_at(Instant::now()) }

    /// Evaluate expiry at `now` against the timeout configured right now.
    pub fn check_at(&self, now: Instant) -> IdleState {
        if self.expired.load(Ordering::Acquire) {
            return IdleState::Closing;
        }
        let timeout = self.config.idle_timeout();
        if timeout.is_zero() {
            return IdleState::Disabled;
        }
        let idle_for = now.saturating_duration_since(self.last_activity());
        if idle_for < timeout {
            return IdleState::Active {
                remaining: timeout - idle_for,
            };
        }
        if self.expired.swap(true, Ordering::AcqRel) {
            IdleState::Closing
        } else {
            IdleState::Expired { idle_for }
        }
    }

    /// Whether expiry has been reported.
    #[must_use]
    pub fn is_expired(&self) -> bool { self.expired.load(Ordering::Acquire) }

    /// Re-arm after an expiry and record activity now.
    pub fn reset(&self) {
        self.touch();
        self.expired.store(false, Ordering::Release);
    }

    fn offset_of(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin);
        u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
    }
}
