//! Application-facing callbacks.
//!
//! [`FrameHandler`] is the frame-level interface a transport drives for each
//! connection. [`MessageHooks`] is the capability set an application hands
//! to the [`MessageHandler`](crate::message_assembler::MessageHandler): every
//! hook is optional, and a missing message hook is a normal, checked
//! condition that rejects messages of that kind.

use std::{fmt, sync::Arc};

use bytes::Bytes;

use crate::{
    completion::Completion,
    error::ProtocolError,
    frame::{CloseCode, Frame},
    message_assembler::MessageKind,
    session::CoreSession,
};

/// Frame-level handler driven by the transport.
///
/// The transport calls [`on_frame`](Self::on_frame) strictly sequentially
/// for one connection, so implementations need no internal locking.
pub trait FrameHandler: Send + 'static {
    /// The session is established and ready for traffic.
    fn on_open(&mut self, session: Arc<dyn CoreSession>, completion: Completion);

    /// One inbound frame. `completion` must be resolved exactly once.
    fn on_frame(&mut self, frame: Frame, completion: Completion);

    /// The connection is failing with `error`.
    fn on_error(&mut self, _error: &ProtocolError) {}

    /// The connection has closed with `code`.
    fn on_closed(&mut self, _code: CloseCode) {}

    /// Whether the handler manages demand itself.
    ///
    /// A demanding handler receives one frame per unit of demand it
    /// requested through [`CoreSession::demand`]. The transport asks again
    /// before every frame, so the answer may change mid-session.
    fn is_demanding(&self) -> bool { false }
}

type OpenHook = Box<dyn FnMut(&Arc<dyn CoreSession>) + Send + 'static>;
type TextHook = Box<dyn FnMut(String, Completion) + Send + 'static>;
type BinaryHook = Box<dyn FnMut(Bytes, Completion) + Send + 'static>;
type ControlHook = Box<dyn FnMut(&Frame) + Send + 'static>;
type ErrorHook = Box<dyn FnMut(&ProtocolError) + Send + 'static>;
type ClosedHook = Box<dyn FnMut(CloseCode) + Send + 'static>;

/// Optional message-level callbacks supplied by the application.
///
/// # Examples
///
/// ```
/// use wiresocket::{hooks::MessageHooks, message_assembler::MessageKind};
///
/// let hooks = MessageHooks::new().on_text(|text, completion| {
///     println!("received {text}");
///     completion.succeed();
/// });
/// assert!(hooks.handles(MessageKind::Text));
/// assert!(!hooks.handles(MessageKind::Binary));
/// ```
#[derive(Default)]
pub struct MessageHooks {
    pub(crate) on_open: Option<OpenHook>,
    pub(crate) on_text: Option<TextHook>,
    pub(crate) on_binary: Option<BinaryHook>,
    pub(crate) on_control: Option<ControlHook>,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) on_closed: Option<ClosedHook>,
    pub(crate) demanding: bool,
}

impl MessageHooks {
    /// Hooks with every callback absent.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Called once the session opens; may adjust configuration, request
    /// demand or keep the session for sending.
    #[must_use]
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Arc<dyn CoreSession>) + Send + 'static,
    {
        self.on_open = Some(Box::new(f));
        self
    }

    /// Receives whole text messages.
    #[must_use]
    pub fn on_text<F>(mut self, f: F) -> Self
    where
        F: FnMut(String, Completion) + Send + 'static,
    {
        self.on_text = Some(Box::new(f));
        self
    }

    /// Receives whole binary messages.
    #[must_use]
    pub fn on_binary<F>(mut self, f: F) -> Self
    where
        F: FnMut(Bytes, Completion) + Send + 'static,
    {
        self.on_binary = Some(Box::new(f));
        self
    }

    /// Observes PING and PONG frames.
    #[must_use]
    pub fn on_control<F>(mut self, f: F) -> Self
    where
        F: FnMut(&Frame) + Send + 'static,
    {
        self.on_control = Some(Box::new(f));
        self
    }

    /// Observes connection failures.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: FnMut(&ProtocolError) + Send + 'static,
    {
        self.on_error = Some(Box::new(f));
        self
    }

    /// Observes connection closure.
    #[must_use]
    pub fn on_closed<F>(mut self, f: F) -> Self
    where
        F: FnMut(CloseCode) + Send + 'static,
    {
        self.on_closed = Some(Box::new(f));
        self
    }

    /// Start the session with demand managed by the application.
    ///
    /// The live flag is [`SessionConfig::is_demanding`](crate::config::SessionConfig::is_demanding),
    /// which the application may flip at any time.
    #[must_use]
    pub fn demanding(mut self, demanding: bool) -> Self {
        self.demanding = demanding;
        self
    }

    /// Whether a hook is installed for messages of `kind`.
    #[must_use]
    pub fn handles(&self, kind: MessageKind) -> bool {
        match kind {
            MessageKind::Text => self.on_text.is_some(),
            MessageKind::Binary => self.on_binary.is_some(),
        }
    }

    /// Whether the session starts in demanding mode.
    #[must_use]
    pub fn is_demanding(&self) -> bool { self.demanding }
}

impl fmt::Debug for MessageHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHooks")
            .field("on_open", &self.on_open.is_some())
            .field("on_text", &self.on_text.is_some())
            .field("on_binary", &self.on_binary.is_some())
            .field("on_control", &self.on_control.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_closed", &self.on_closed.is_some())
            .field("demanding", &self.demanding)
            .finish()
    }
}
