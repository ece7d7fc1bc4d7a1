//! Session interface between the protocol core and the transport.
//!
//! [`CoreSession`] is what the message assembler and the application use to
//! send frames, request demand and adjust the idle timeout. The transport
//! implements it; [`ChannelSession`] is an in-process implementation that
//! queues outbound frames on a tokio channel, which is enough to drive a
//! [`Connection`](crate::connection::Connection) in tests or behind a custom
//! writer task.
use std::{
    fmt,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use log::debug;
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    completion::Completion,
    config::SessionConfig,
    error::ProtocolError,
    frame::{CloseCode, Frame, OpCode},
    idle::IdleTimeout,
    metrics::{self, Direction},
};

/// Identifier assigned to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl From<u64> for ConnectionId {
    fn from(value: u64) -> Self { Self(value) }
}

impl ConnectionId {
    /// Create a new [`ConnectionId`] with the provided value.
    #[must_use]
    pub const fn new(id: u64) -> Self { Self(id) }

    /// Return the inner `u64` representation.
    #[must_use]
    pub const fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self.0)
    }
}

/// Operations the transport offers to the protocol core and the application.
///
/// Implementations must serialise outbound frames: one frame is fully
/// written or queued before the next begins, and frames from one caller keep
/// their submission order.
pub trait CoreSession: Send + Sync {
    /// Identifier of the underlying connection.
    fn connection_id(&self) -> ConnectionId;

    /// Queue `frame` for sending. `batch` hints that more frames follow
    /// and flushing may be deferred.
    fn send_frame(&self, frame: Frame, completion: Completion, batch: bool);

    /// Grant `n` more units of inbound demand.
    fn demand(&self, n: u64);

    /// Live configuration of this session.
    fn config(&self) -> &SessionConfig;

    /// Current idle timeout.
    fn idle_timeout(&self) -> Duration { self.config().idle_timeout() }

    /// Replace the idle timeout; takes effect on the next idle check.
    fn set_idle_timeout(&self, timeout: Duration) { self.config().set_idle_timeout(timeout); }

    /// Start the closing handshake.
    fn close(&self, code: CloseCode, reason: &str, completion: Completion) {
        self.send_frame(Frame::close(code, reason), completion, false);
    }
}

/// Frame queued by a [`ChannelSession`], awaiting the writer.
#[derive(Debug)]
pub struct OutboundFrame {
    /// Frame to write.
    pub frame: Frame,
    /// Resolved by the writer once the frame is on the wire.
    pub completion: Completion,
    /// Batching hint supplied by the sender.
    pub batch: bool,
}

/// [`CoreSession`] backed by an unbounded tokio channel.
///
/// The channel gives a single total order over concurrent senders, so the
/// frames of a multi-chunk send stay contiguous per caller. Demand is an
/// atomic counter the connection driver consumes one unit at a time.
pub struct ChannelSession {
    id: ConnectionId,
    config: SessionConfig,
    idle: Arc<IdleTimeout>,
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    demand: AtomicU64,
    demand_ready: Notify,
    close_sent: AtomicBool,
    aborted: CancellationToken,
    abort_reason: Mutex<Option<ProtocolError>>,
}

impl ChannelSession {
    /// Create a session and the receiver its writer drains.
    #[must_use]
    pub fn new(
        id: ConnectionId,
        config: SessionConfig,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let idle = Arc::new(IdleTimeout::new(config.clone()));
        let session = Arc::new(Self {
            id,
            config,
            idle,
            outbound: tx,
            demand: AtomicU64::new(0),
            demand_ready: Notify::new(),
            close_sent: AtomicBool::new(false),
            aborted: CancellationToken::new(),
            abort_reason: Mutex::new(None),
        });
        (session, rx)
    }

    /// Activity tracker fed by this session.
    #[must_use]
    pub fn idle(&self) -> &Arc<IdleTimeout> { &self.idle }

    /// Outstanding demand units.
    #[must_use]
    pub fn demand_count(&self) -> u64 { self.demand.load(Ordering::Acquire) }

    /// Consume one unit of demand if any is available.
    pub fn take_demand(&self) -> bool {
        self.demand
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            })
            .is_ok()
    }

    /// Wait until a unit of demand is available, then consume it.
    pub async fn acquire_demand(&self) {
        loop {
            let notified = self.demand_ready.notified();
            if self.take_demand() {
                return;
            }
            notified.await;
        }
    }

    /// Whether a CLOSE frame has been queued.
    #[must_use]
    pub fn is_close_sent(&self) -> bool { self.close_sent.load(Ordering::Acquire) }

    /// Fail the session from outside the connection task.
    ///
    /// Only the first call records its reason; the connection driver observes
    /// the abort through [`aborted`](Self::aborted).
    pub fn abort(&self, error: ProtocolError) {
        if let Ok(mut reason) = self.abort_reason.lock() {
            if reason.is_some() {
                return;
            }
            debug!("session aborted: id={}, error={error}", self.id);
            *reason = Some(error);
        }
        self.aborted.cancel();
    }

    /// Token cancelled once [`abort`](Self::abort) has been called.
    #[must_use]
    pub fn aborted(&self) -> &CancellationToken { &self.aborted }

    /// Reason passed to the first [`abort`](Self::abort) call.
    #[must_use]
    pub fn abort_reason(&self) -> Option<ProtocolError> {
        self.abort_reason.lock().ok().and_then(|reason| reason.clone())
    }
}

impl CoreSession for ChannelSession {
    fn connection_id(&self) -> ConnectionId { self.id }

    fn send_frame(&self, frame: Frame, completion: Completion, batch: bool) {
        if self.is_close_sent() {
            completion.fail(ProtocolError::Transport("session already closed".into()));
            return;
        }
        if frame.opcode() == OpCode::Close {
            self.close_sent.store(true, Ordering::Release);
        }
        self.idle.touch();
        match self.outbound.send(OutboundFrame {
            frame,
            completion,
            batch,
        }) {
            Ok(()) => metrics::inc_frames(Direction::Outbound),
            Err(mpsc::error::SendError(rejected)) => rejected
                .completion
                .fail(ProtocolError::Transport("writer has gone away".into())),
        }
    }

    fn demand(&self, n: u64) {
        self.demand.fetch_add(n, Ordering::AcqRel);
        self.demand_ready.notify_waiters();
    }

    fn config(&self) -> &SessionConfig { &self.config }
}

impl fmt::Debug for ChannelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSession")
            .field("id", &self.id)
            .field("demand", &self.demand_count())
            .field("close_sent", &self.is_close_sent())
            .finish_non_exhaustive()
    }
}
