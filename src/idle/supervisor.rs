//! Periodic idle checks for a set of connections.
//!
//! The supervisor keeps non-owning references to each connection's
//! [`IdleTimeout`], so a closed connection is pruned on the next sweep even
//! if it never deregistered.

use std::{
    fmt,
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::DashMap;
use log::info;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use super::{IdleState, IdleTimeout};
use crate::session::ConnectionId;

/// Default interval between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_millis(250);

type ExpireCallback = Arc<dyn Fn(Duration) + Send + Sync + 'static>;

struct Entry {
    idle: Weak<IdleTimeout>,
    on_expire: ExpireCallback,
}

/// Registry of idle trackers swept on a fixed interval.
///
/// # Examples
///
/// ```
/// use std::{sync::Arc, time::Duration};
///
/// use wiresocket::{
///     config::SessionConfig,
///     idle::{IdleSupervisor, IdleTimeout},
///     session::ConnectionId,
/// };
///
/// let supervisor = IdleSupervisor::new(Duration::from_millis(100));
/// let idle = Arc::new(IdleTimeout::new(SessionConfig::default()));
/// supervisor.register(ConnectionId::new(1), &idle, |idle_for| {
///     println!("connection idle for {idle_for:?}");
/// });
/// assert_eq!(supervisor.len(), 1);
/// ```
pub struct IdleSupervisor {
    entries: DashMap<ConnectionId, Entry>,
    interval: Duration,
}

impl Default for IdleSupervisor {
    fn default() -> Self { Self::new(DEFAULT_SWEEP_INTERVAL) }
}

impl IdleSupervisor {
    /// Create a supervisor sweeping every `interval` (at least 1 ms).
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Interval between sweeps.
    #[must_use]
    pub const fn interval(&self) -> Duration { self.interval }

    /// Watch `idle`; `on_expire` runs once per expiry with the idle duration.
    pub fn register<F>(&self, id: ConnectionId, idle: &Arc<IdleTimeout>, on_expire: F)
    where
        F: Fn(Duration) + Send + Sync + 'static,
    {
        self.entries.insert(
            id,
            Entry {
                idle: Arc::downgrade(idle),
                on_expire: Arc::new(on_expire),
            },
        );
    }

    /// Stop watching `id`, typically on connection teardown.
    pub fn deregister(&self, id: &ConnectionId) { self.entries.remove(id); }

    /// Number of registered connections, including ones not yet pruned.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Returns `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Check every connection now.
    pub fn sweep(&self) -> usize { self.sweep_at(Instant::now()) }

    /// Check every connection at `now`, returning how many expired.
    ///
    /// Callbacks run after the registry locks are released, so they may
    /// deregister connections.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        self.entries.retain(|id, entry| {
            let Some(idle) = entry.idle.upgrade() else {
                return false;
            };
            if let IdleState::Expired { idle_for } = idle.check_at(now) {
                expired.push((*id, idle_for, Arc::clone(&entry.on_expire)));
            }
            true
        });
        let count = expired.len();
        for (id, idle_for, on_expire) in expired {
            info!("idle timeout expired: id={id}, idle_for={idle_for:?}");
            crate::metrics::inc_idle_timeouts();
            on_expire(idle_for);
        }
        count
    }

    /// Sweep on the configured interval until `shutdown` is cancelled.
    #[must_use]
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.sweep();
                    }
                }
            }
        })
    }
}

impl fmt::Debug for IdleSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdleSupervisor")
            .field("connections", &self.entries.len())
            .field("interval", &self.interval)
            .finish()
    }
}
