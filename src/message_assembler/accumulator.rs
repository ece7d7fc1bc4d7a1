//! Buffer for a message spread over several frames.
//!
//! At most one accumulator is open per connection. It exists from the first
//! non-final fragment until the fragment that completes the message, and is
//! discarded on any failure.

use std::{fmt, num::NonZeroUsize};

use bytes::Bytes;

use crate::{error::ProtocolError, frame::OpCode, utf8::Utf8Validator};

/// Kind of an application message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// UTF-8 text.
    Text,
    /// Opaque bytes.
    Binary,
}

impl MessageKind {
    /// Kind started by `opcode`, if it opens a message.
    #[must_use]
    pub const fn from_opcode(opcode: OpCode) -> Option<Self> {
        match opcode {
            OpCode::Text => Some(Self::Text),
            OpCode::Binary => Some(Self::Binary),
            _ => None,
        }
    }

    /// Opcode of the first frame of a message of this kind.
    #[must_use]
    pub const fn opcode(self) -> OpCode {
        match self {
            Self::Text => OpCode::Text,
            Self::Binary => OpCode::Binary,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
        })
    }
}

/// A complete message ready for delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssembledMessage {
    /// Validated text.
    Text(String),
    /// Binary payload.
    Binary(Bytes),
}

impl AssembledMessage {
    /// Kind of this message.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        match self {
            Self::Text(_) => MessageKind::Text,
            Self::Binary(_) => MessageKind::Binary,
        }
    }

    /// Validate and size-check a message that arrived in one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MessageTooLarge`] when the payload exceeds
    /// `limit`, or [`ProtocolError::BadPayload`] for invalid UTF-8 text.
    pub fn from_single_frame(
        kind: MessageKind,
        payload: Bytes,
        limit: Option<NonZeroUsize>,
    ) -> Result<Self, ProtocolError> {
        check_limit(kind, payload.len(), limit)?;
        match kind {
            MessageKind::Binary => Ok(Self::Binary(payload)),
            MessageKind::Text => std::str::from_utf8(&payload)
                .map(|text| Self::Text(text.to_owned()))
                .map_err(|error| ProtocolError::bad_payload(error.to_string())),
        }
    }
}

/// Partially received message.
#[derive(Debug)]
pub(crate) struct MessageAccumulator {
    kind: MessageKind,
    buffer: Vec<u8>,
    validator: Utf8Validator,
}

impl MessageAccumulator {
    pub(crate) fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            buffer: Vec::new(),
            validator: Utf8Validator::new(),
        }
    }

    pub(crate) const fn kind(&self) -> MessageKind { self.kind }

    /// Bytes appended so far.
    pub(crate) fn accumulated_size(&self) -> usize { self.buffer.len() }

    /// Append one fragment, enforcing `limit` and, for text, UTF-8 validity.
    ///
    /// The size check runs first, so an oversized fragment is rejected even
    /// when it would also terminate the message.
    pub(crate) fn append(
        &mut self,
        chunk: &[u8],
        limit: Option<NonZeroUsize>,
    ) -> Result<(), ProtocolError> {
        let attempted = self.buffer.len().saturating_add(chunk.len());
        check_limit(self.kind, attempted, limit)?;
        if self.kind == MessageKind::Text {
            self.validator
                .feed(chunk)
                .map_err(|error| ProtocolError::bad_payload(error.to_string()))?;
        }
        self.buffer.extend_from_slice(chunk);
        Ok(())
    }

    /// Close the accumulator and produce the message.
    pub(crate) fn finish(mut self) -> Result<AssembledMessage, ProtocolError> {
        match self.kind {
            MessageKind::Binary => Ok(AssembledMessage::Binary(Bytes::from(self.buffer))),
            MessageKind::Text => {
                self.validator
                    .finish()
                    .map_err(|error| ProtocolError::bad_payload(error.to_string()))?;
                String::from_utf8(self.buffer)
                    .map(AssembledMessage::Text)
                    .map_err(|error| ProtocolError::bad_payload(error.to_string()))
            }
        }
    }
}

fn check_limit(
    kind: MessageKind,
    attempted: usize,
    limit: Option<NonZeroUsize>,
) -> Result<(), ProtocolError> {
    match limit {
        Some(limit) if attempted > limit.get() => Err(ProtocolError::MessageTooLarge {
            kind,
            attempted,
            limit,
        }),
        _ => Ok(()),
    }
}
