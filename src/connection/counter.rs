//! Live connection accounting.

use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::{metrics, session::ConnectionId};

static RUNNING: AtomicU64 = AtomicU64::new(0);

/// Marks one connection as running for as long as it is held.
///
/// Dropping the guard, including during unwinding, releases the slot and
/// the `connections_active` gauge together.
pub(super) struct ActiveConnection {
    id: ConnectionId,
}

impl ActiveConnection {
    /// Count `id` as running and return the guard with the new total.
    pub(super) fn enter(id: ConnectionId) -> (Self, u64) {
        let running = RUNNING.fetch_add(1, Ordering::Relaxed) + 1;
        metrics::inc_connections();
        (Self { id }, running)
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        let remaining = RUNNING.fetch_sub(1, Ordering::Relaxed).saturating_sub(1);
        metrics::dec_connections();
        debug!("connection released: id={}, remaining={remaining}", self.id);
    }
}

/// Number of connections currently inside
/// [`Connection::run`](super::Connection::run).
#[must_use]
pub fn active_connection_count() -> u64 { RUNNING.load(Ordering::Relaxed) }
