//! Canonical error types for session processing.
//!
//! [`ProtocolError`] is the failure carried by a
//! [`Completion`](crate::completion::Completion). Every variant maps to the
//! close code the transport should use when it turns a failed completion into
//! a closing handshake.

use std::{num::NonZeroUsize, time::Duration};

use thiserror::Error;

use crate::{frame::CloseCode, message_assembler::MessageKind};

/// Failure raised while processing frames for one connection.
///
/// These errors are local to a connection and never retried by the core.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProtocolError {
    /// Malformed UTF-8, or a message kind the application does not handle.
    #[error("bad payload: {reason}")]
    BadPayload {
        /// Human-readable description of the rejected payload.
        reason: String,
    },
    /// The accumulated message exceeded the configured size limit.
    #[error("{kind} message too large: {attempted} bytes > {limit} bytes")]
    MessageTooLarge {
        /// Kind of the oversized message.
        kind: MessageKind,
        /// Bytes accumulated when the guard fired.
        attempted: usize,
        /// Configured size cap.
        limit: NonZeroUsize,
    },
    /// Frames arrived in an order the protocol forbids.
    #[error("protocol violation: {reason}")]
    Protocol {
        /// Description of the violated rule.
        reason: String,
    },
    /// No read or write activity within the configured idle timeout.
    #[error("idle timeout expired after {after:?}")]
    IdleTimeout {
        /// Time spent idle when expiry was detected.
        after: Duration,
    },
    /// A completion was dropped before anyone resolved it.
    #[error("completion dropped before it was resolved")]
    Cancelled,
    /// The application failed a completion it was handed.
    #[error("application failure: {0}")]
    Application(String),
    /// The transport could not deliver a frame.
    #[error("transport failure: {0}")]
    Transport(String),
}

impl ProtocolError {
    /// Build a [`ProtocolError::BadPayload`].
    #[must_use]
    pub fn bad_payload(reason: impl Into<String>) -> Self {
        Self::BadPayload {
            reason: reason.into(),
        }
    }

    /// Build a [`ProtocolError::Protocol`].
    #[must_use]
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Protocol {
            reason: reason.into(),
        }
    }

    /// Close code the transport should send for this failure.
    #[must_use]
    pub const fn close_code(&self) -> CloseCode {
        match self {
            Self::BadPayload { .. } => CloseCode::BadPayload,
            Self::MessageTooLarge { .. } => CloseCode::MessageTooLarge,
            Self::Protocol { .. } => CloseCode::Protocol,
            Self::IdleTimeout { .. } | Self::Cancelled => CloseCode::GoingAway,
            Self::Application(_) | Self::Transport(_) => CloseCode::ServerError,
        }
    }

    /// Short label used for logs and metrics.
    #[must_use]
    pub const fn kind_label(&self) -> &'static str {
        match self {
            Self::BadPayload { .. } => "bad_payload",
            Self::MessageTooLarge { .. } => "message_too_large",
            Self::Protocol { .. } => "protocol",
            Self::IdleTimeout { .. } => "idle_timeout",
            Self::Cancelled => "cancelled",
            Self::Application(_) => "application",
            Self::Transport(_) => "transport",
        }
    }
}

/// Result alias used by completion outcomes.
pub type Result<T> = std::result::Result<T, ProtocolError>;
