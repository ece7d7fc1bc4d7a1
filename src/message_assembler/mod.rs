//! Reassembly of frames into application messages.
//!
//! [`MessageHandler`] consumes the frame stream of one connection and turns
//! it into whole text or binary messages for the application's
//! [`MessageHooks`]. It enforces per-kind size limits, validates UTF-8
//! incrementally across fragment boundaries and services demand for the
//! frames the application never sees.
//!
//! ## Completion and demand
//!
//! Every frame arrives with a [`Completion`]. Control frames and non-final
//! fragments are resolved by the handler itself, which then requests one
//! unit of demand when the application is demanding. A frame that completes
//! a message is resolved through a derived completion handed to the
//! application, and no demand is requested on its behalf: only the
//! application knows when it is ready for more.

mod accumulator;
mod send;

use std::sync::Arc;

pub use accumulator::{AssembledMessage, MessageKind};
use accumulator::MessageAccumulator;
use log::{debug, warn};
pub use send::{send_binary, send_text};

use crate::{
    completion::Completion,
    config::SessionConfig,
    error::ProtocolError,
    frame::{CloseCode, Frame, OpCode},
    hooks::{FrameHandler, MessageHooks},
    session::CoreSession,
};

/// Frame handler assembling messages for [`MessageHooks`].
///
/// # Examples
///
/// ```
/// use wiresocket::{
///     completion::Completion,
///     config::SessionConfig,
///     frame::{Frame, OpCode},
///     hooks::{FrameHandler, MessageHooks},
///     message_assembler::MessageHandler,
/// };
///
/// let hooks = MessageHooks::new().on_text(|text, completion| {
///     assert_eq!(text, "Hello World");
///     completion.succeed();
/// });
/// let mut handler = MessageHandler::new(hooks, SessionConfig::default());
///
/// let (first, mut first_done) = Completion::channel();
/// handler.on_frame(Frame::new(OpCode::Text, false, "Hello "), first);
/// assert_eq!(first_done.try_outcome(), Some(Ok(())));
///
/// let (last, mut last_done) = Completion::channel();
/// handler.on_frame(Frame::new(OpCode::Continuation, true, "World"), last);
/// assert_eq!(last_done.try_outcome(), Some(Ok(())));
/// ```
pub struct MessageHandler {
    hooks: MessageHooks,
    config: SessionConfig,
    session: Option<Arc<dyn CoreSession>>,
    accumulator: Option<MessageAccumulator>,
    closed: bool,
}

impl MessageHandler {
    /// Create a handler reading its limits from `config`.
    ///
    /// Transports should pass the same configuration their session uses so
    /// runtime changes reach both.
    #[must_use]
    pub fn new(hooks: MessageHooks, config: SessionConfig) -> Self {
        if hooks.is_demanding() {
            config.set_demanding(true);
        }
        Self {
            hooks,
            config,
            session: None,
            accumulator: None,
            closed: false,
        }
    }

    /// Live configuration used for size checks.
    #[must_use]
    pub fn config(&self) -> &SessionConfig { &self.config }

    /// Set the text size limit; `0` removes it. Applies from the next frame.
    pub fn set_max_text_message_size(&self, bytes: usize) {
        self.config.set_max_text_message_size(bytes);
    }

    /// Set the binary size limit; `0` removes it. Applies from the next frame.
    pub fn set_max_binary_message_size(&self, bytes: usize) {
        self.config.set_max_binary_message_size(bytes);
    }

    /// Switch demanding mode on or off. Applies from the next frame.
    pub fn set_demanding(&self, demanding: bool) { self.config.set_demanding(demanding); }

    /// Kind of the message currently being accumulated, if any.
    #[must_use]
    pub fn open_message(&self) -> Option<MessageKind> {
        self.accumulator.as_ref().map(MessageAccumulator::kind)
    }

    /// Session this handler was opened with.
    #[must_use]
    pub fn session(&self) -> Option<&Arc<dyn CoreSession>> { self.session.as_ref() }

    /// Send a text message as one frame per chunk.
    pub fn send_text<I, S>(&self, chunks: I, completion: Completion, batch: bool)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match &self.session {
            Some(session) => send_text(session.as_ref(), chunks, completion, batch),
            None => completion.fail(not_open()),
        }
    }

    /// Send a binary message as one frame per chunk.
    pub fn send_binary<I, B>(&self, chunks: I, completion: Completion, batch: bool)
    where
        I: IntoIterator<Item = B>,
        B: Into<bytes::Bytes>,
    {
        match &self.session {
            Some(session) => send_binary(session.as_ref(), chunks, completion, batch),
            None => completion.fail(not_open()),
        }
    }

    /// Send `text` as a single final TEXT frame.
    pub fn send_text_message(&self, text: impl Into<String>, completion: Completion) {
        self.send_text([text.into()], completion, false);
    }

    /// Send `data` as a single final BINARY frame.
    pub fn send_binary_message(&self, data: impl Into<bytes::Bytes>, completion: Completion) {
        self.send_binary([data.into()], completion, false);
    }

    fn demand_one(&self) {
        if !self.config.is_demanding() {
            return;
        }
        if let Some(session) = &self.session {
            session.demand(1);
        }
    }

    fn on_control_frame(&mut self, frame: &Frame, completion: Completion) {
        if let Some(hook) = self.hooks.on_control.as_mut() {
            hook(frame);
        }
        completion.succeed();
        self.demand_one();
    }

    fn on_close_frame(&mut self, completion: Completion) {
        if let Some(open) = self.accumulator.take() {
            debug!(
                "discarding partial {} message on close: accumulated={}",
                open.kind(),
                open.accumulated_size()
            );
        }
        self.closed = true;
        completion.succeed();
    }

    fn on_data_frame(&mut self, frame: Frame, completion: Completion) {
        if self.closed {
            completion.fail(ProtocolError::protocol("data frame received after CLOSE"));
            return;
        }
        let kind = match self.resolve_kind(frame.opcode()) {
            Ok(kind) => kind,
            Err(error) => {
                self.reject(error, completion);
                return;
            }
        };
        if !self.hooks.handles(kind) {
            self.reject(
                ProtocolError::bad_payload(format!("{kind} messages are not supported")),
                completion,
            );
            return;
        }

        let fin = frame.is_fin();
        let limit = self.config.max_message_size(kind);
        let payload = frame.into_payload();

        if fin && self.accumulator.is_none() {
            match AssembledMessage::from_single_frame(kind, payload, limit) {
                Ok(message) => self.deliver(message, completion),
                Err(error) => self.reject(error, completion),
            }
            return;
        }

        let accumulator = self.accumulator.get_or_insert_with(|| {
            debug!("opening {kind} message accumulator");
            MessageAccumulator::new(kind)
        });
        if let Err(error) = accumulator.append(&payload, limit) {
            self.reject(error, completion);
            return;
        }

        if !fin {
            completion.succeed();
            self.demand_one();
            return;
        }

        let Some(accumulator) = self.accumulator.take() else {
            completion.fail(ProtocolError::protocol("message accumulator vanished"));
            return;
        };
        debug!(
            "{kind} message complete: size={}",
            accumulator.accumulated_size()
        );
        match accumulator.finish() {
            Ok(message) => self.deliver(message, completion),
            Err(error) => self.reject(error, completion),
        }
    }

    /// Determine the kind a data frame belongs to, checking frame order.
    fn resolve_kind(&mut self, opcode: OpCode) -> Result<MessageKind, ProtocolError> {
        match (MessageKind::from_opcode(opcode), &self.accumulator) {
            (None, Some(open)) => Ok(open.kind()),
            (None, None) => Err(ProtocolError::protocol(
                "continuation frame without an open message",
            )),
            (Some(_), Some(open)) => Err(ProtocolError::protocol(format!(
                "{opcode} frame received while a {} message is open",
                open.kind()
            ))),
            (Some(kind), None) => Ok(kind),
        }
    }

    fn reject(&mut self, error: ProtocolError, completion: Completion) {
        self.accumulator = None;
        warn!("frame rejected: error={error}");
        completion.fail(error);
    }

    fn deliver(&mut self, message: AssembledMessage, completion: Completion) {
        let derived = completion.derive();
        match message {
            AssembledMessage::Text(text) => match self.hooks.on_text.as_mut() {
                Some(hook) => hook(text, derived),
                None => derived.fail(ProtocolError::bad_payload("TEXT messages are not supported")),
            },
            AssembledMessage::Binary(data) => match self.hooks.on_binary.as_mut() {
                Some(hook) => hook(data, derived),
                None => {
                    derived.fail(ProtocolError::bad_payload("BINARY messages are not supported"));
                }
            },
        }
    }
}

impl FrameHandler for MessageHandler {
    fn on_open(&mut self, session: Arc<dyn CoreSession>, completion: Completion) {
        if let Some(hook) = self.hooks.on_open.as_mut() {
            hook(&session);
        }
        self.session = Some(session);
        self.closed = false;
        completion.succeed();
    }

    fn on_frame(&mut self, frame: Frame, completion: Completion) {
        match frame.opcode() {
            OpCode::Ping | OpCode::Pong => self.on_control_frame(&frame, completion),
            OpCode::Close => self.on_close_frame(completion),
            OpCode::Text | OpCode::Binary | OpCode::Continuation => {
                self.on_data_frame(frame, completion);
            }
        }
    }

    fn on_error(&mut self, error: &ProtocolError) {
        self.accumulator = None;
        if let Some(hook) = self.hooks.on_error.as_mut() {
            hook(error);
        }
    }

    fn on_closed(&mut self, code: CloseCode) {
        self.accumulator = None;
        self.closed = true;
        if let Some(hook) = self.hooks.on_closed.as_mut() {
            hook(code);
        }
    }

    fn is_demanding(&self) -> bool { self.config.is_demanding() }
}

impl std::fmt::Debug for MessageHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageHandler")
            .field("hooks", &self.hooks)
            .field("open_message", &self.open_message())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

fn not_open() -> ProtocolError { ProtocolError::Transport("session is not open".into()) }

#[cfg(test)]
mod tests;
