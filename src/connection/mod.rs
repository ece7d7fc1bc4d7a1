//! Per-connection driver.
//!
//! [`Connection`] feeds inbound frames to a [`FrameHandler`] strictly one at
//! a time and waits for each frame's completion before reading the next. It
//! answers PING with PONG, honours demand for demanding handlers and turns
//! any failure into a closing handshake carrying the matching close code.
//! Idle expiry reaches the driver through [`ChannelSession::abort`], called
//! by an [`IdleSupervisor`] the connection is registered with.

mod counter;
mod spawn;

use std::sync::Arc;

pub use counter::active_connection_count;
use counter::ActiveConnection;
use futures::{Stream, StreamExt};
use log::{info, warn};
pub use spawn::spawn_connection;
use tokio_util::sync::CancellationToken;

use crate::{
    completion::{Completion, CompletionFuture},
    error::ProtocolError,
    frame::{CloseCode, Frame, OpCode},
    hooks::FrameHandler,
    idle::IdleSupervisor,
    metrics::{self, Direction},
    session::{ChannelSession, CoreSession},
};

/// Longest close reason the protocol can carry, in bytes.
const MAX_CLOSE_REASON: usize = 123;

/// Reason sent when the server shuts a connection down.
const SHUTDOWN_REASON: &str = "server shutting down";

enum Event {
    Shutdown,
    Aborted,
    Frame(Frame),
    Eof,
}

/// Drives one upgraded connection.
///
/// # Examples
///
/// ```
/// use futures::stream;
/// use tokio_util::sync::CancellationToken;
/// use wiresocket::{
///     config::SessionConfig,
///     connection::Connection,
///     frame::{CloseCode, Frame},
///     hooks::MessageHooks,
///     message_assembler::MessageHandler,
///     session::{ChannelSession, ConnectionId},
/// };
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let config = SessionConfig::default();
/// let (session, mut outbound) = ChannelSession::new(ConnectionId::new(1), config.clone());
/// let hooks = MessageHooks::new().on_text(|_, completion| completion.succeed());
/// let connection = Connection::new(Box::new(MessageHandler::new(hooks, config)), session);
///
/// let inbound = stream::iter([Frame::text("hi"), Frame::close(CloseCode::Normal, "")]);
/// connection
///     .run(inbound, CancellationToken::new())
///     .await
///     .expect("clean close");
/// let echoed = outbound.recv().await.expect("close echo");
/// assert_eq!(echoed.frame.close_status(), Some(1000));
/// # }
/// ```
pub struct Connection {
    handler: Box<dyn FrameHandler>,
    session: Arc<ChannelSession>,
    supervisor: Option<Arc<IdleSupervisor>>,
}

impl Connection {
    /// Pair a handler with the session it sends through.
    #[must_use]
    pub fn new(handler: Box<dyn FrameHandler>, session: Arc<ChannelSession>) -> Self {
        Self {
            handler,
            session,
            supervisor: None,
        }
    }

    /// Session owned by this connection.
    #[must_use]
    pub fn session(&self) -> &Arc<ChannelSession> { &self.session }

    /// Register with `supervisor` so idle expiry aborts this connection
    /// with [`ProtocolError::IdleTimeout`].
    pub fn supervise(&mut self, supervisor: &Arc<IdleSupervisor>) {
        let session = Arc::downgrade(&self.session);
        supervisor.register(
            self.session.connection_id(),
            self.session.idle(),
            move |after| {
                if let Some(session) = session.upgrade() {
                    session.abort(ProtocolError::IdleTimeout { after });
                }
            },
        );
        self.supervisor = Some(Arc::clone(supervisor));
    }

    /// Process `inbound` until the connection closes.
    ///
    /// A CLOSE from the peer is echoed and ends the connection cleanly, as
    /// does cancelling `shutdown`.
    ///
    /// # Errors
    ///
    /// Returns the [`ProtocolError`] that failed the connection. A CLOSE
    /// frame with the error's close code has been queued by then.
    pub async fn run<S>(mut self, mut inbound: S, shutdown: CancellationToken) -> Result<(), ProtocolError>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        let id = self.session.connection_id();
        let (_guard, active) = ActiveConnection::enter(id);
        info!("connection opened: id={id}, active={active}");

        let outcome = match self.drive(&mut inbound, &shutdown).await {
            Ok(code) => {
                info!("connection closed: id={id}, code={code}");
                self.handler.on_closed(code);
                Ok(())
            }
            Err(error) => {
                self.fail(&error);
                Err(error)
            }
        };
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.deregister(&id);
        }
        outcome
    }

    async fn drive<S>(
        &mut self,
        inbound: &mut S,
        shutdown: &CancellationToken,
    ) -> Result<CloseCode, ProtocolError>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        let session: Arc<dyn CoreSession> = self.session.clone();
        let (opened, done) = Completion::channel();
        self.handler.on_open(session, opened);
        Self::await_completion(&self.session, done, shutdown).await?;

        loop {
            let demanding = self.handler.is_demanding();
            let event = tokio::select! {
                biased;
                () = shutdown.cancelled() => Event::Shutdown,
                () = self.session.aborted().cancelled() => Event::Aborted,
                frame = Self::next_frame(&self.session, inbound, demanding) => {
                    frame.map_or(Event::Eof, Event::Frame)
                }
            };
            let frame = match event {
                Event::Shutdown => return Ok(self.shutdown()),
                Event::Aborted => return Err(abort_reason(&self.session)),
                Event::Eof => {
                    return Err(ProtocolError::Transport(
                        "peer closed without a CLOSE frame".into(),
                    ));
                }
                Event::Frame(frame) => frame,
            };
            if let Some(code) = self.dispatch(frame, shutdown).await? {
                return Ok(code);
            }
        }
    }

    /// Wait for demand when the handler manages it, then read one frame.
    async fn next_frame<S>(session: &ChannelSession, inbound: &mut S, demanding: bool) -> Option<Frame>
    where
        S: Stream<Item = Frame> + Unpin,
    {
        if demanding {
            session.acquire_demand().await;
        }
        inbound.next().await
    }

    /// Hand one frame to the handler. Returns the close code once the peer
    /// has closed.
    async fn dispatch(
        &mut self,
        frame: Frame,
        shutdown: &CancellationToken,
    ) -> Result<Option<CloseCode>, ProtocolError> {
        self.session.idle().touch();
        metrics::inc_frames(Direction::Inbound);

        let opcode = frame.opcode();
        let pong = (opcode == OpCode::Ping).then(|| Frame::pong(frame.payload().clone()));
        let peer_close = frame.close_code();

        let (completion, done) = Completion::channel();
        self.handler.on_frame(frame, completion);
        Self::await_completion(&self.session, done, shutdown).await?;

        if let Some(pong) = pong {
            if !self.session.is_close_sent() {
                self.session.send_frame(pong, Completion::noop(), false);
            }
        }
        if let Some(code) = peer_close {
            if !self.session.is_close_sent() {
                self.session.close(code, "", Completion::noop());
            }
            return Ok(Some(code));
        }
        Ok(None)
    }

    async fn await_completion(
        session: &ChannelSession,
        done: CompletionFuture,
        shutdown: &CancellationToken,
    ) -> Result<(), ProtocolError> {
        tokio::select! {
            biased;
            outcome = done => outcome,
            () = session.aborted().cancelled() => Err(abort_reason(session)),
            () = shutdown.cancelled() => Err(ProtocolError::Cancelled),
        }
    }

    fn shutdown(&self) -> CloseCode {
        if !self.session.is_close_sent() {
            self.session
                .close(CloseCode::GoingAway, SHUTDOWN_REASON, Completion::noop());
        }
        CloseCode::GoingAway
    }

    fn fail(&mut self, error: &ProtocolError) {
        let code = error.close_code();
        warn!(
            "connection failed: id={}, code={code}, error={error}",
            self.session.connection_id()
        );
        metrics::inc_errors(error.kind_label());
        self.handler.on_error(error);
        if !self.session.is_close_sent() {
            self.session
                .close(code, &close_reason(error), Completion::noop());
        }
        self.handler.on_closed(code);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("session", &self.session)
            .field("supervised", &self.supervisor.is_some())
            .finish_non_exhaustive()
    }
}

fn abort_reason(session: &ChannelSession) -> ProtocolError {
    session.abort_reason().unwrap_or(ProtocolError::Cancelled)
}

fn close_reason(error: &ProtocolError) -> String {
    let mut reason = error.to_string();
    if reason.len() > MAX_CLOSE_REASON {
        let mut end = MAX_CLOSE_REASON;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}
