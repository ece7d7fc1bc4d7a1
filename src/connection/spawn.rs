//! Spawning connections onto a task tracker.

use std::panic::AssertUnwindSafe;

use futures::{FutureExt, Stream};
use log::error;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use super::Connection;
use crate::{frame::Frame, metrics, panic::PanicMessage, session::CoreSession};

/// Run `connection` on `tracker`, logging and discarding any panic raised by
/// the handler.
///
/// A panicking handler takes only its own connection down. Protocol failures
/// are already reported by [`Connection::run`] and are not logged again.
pub fn spawn_connection<S>(
    connection: Connection,
    inbound: S,
    shutdown: CancellationToken,
    tracker: &TaskTracker,
) where
    S: Stream<Item = Frame> + Unpin + Send + 'static,
{
    let id = connection.session().connection_id();
    tracker.spawn(async move {
        let task = AssertUnwindSafe(connection.run(inbound, shutdown)).catch_unwind();
        if let Err(payload) = task.await {
            metrics::inc_errors("panic");
            let panic = PanicMessage::new(payload);
            // Emit via both `log` and `tracing` for tests that capture either.
            error!("connection task panicked: id={id}, panic={panic}");
            tracing::error!(%id, panic = %panic, "connection task panicked");
        }
    });
}
