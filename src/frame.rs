//! Frame values exchanged with the transport.
//!
//! A [`Frame`] is produced by the transport for every wire frame it decodes
//! and is consumed exactly once by a [`FrameHandler`](crate::hooks::FrameHandler).
//! Header parsing and masking happen below this layer, so a frame here is
//! just an opcode, the final-fragment flag and an opaque payload.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

/// Opcode carried by a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpCode {
    /// Continues a fragmented TEXT or BINARY message.
    Continuation,
    /// First (or only) frame of a UTF-8 text message.
    Text,
    /// First (or only) frame of a binary message.
    Binary,
    /// Starts the closing handshake.
    Close,
    /// Keep-alive probe; the payload is echoed in the matching PONG.
    Ping,
    /// Reply to a PING, or an unsolicited heartbeat.
    Pong,
}

impl OpCode {
    /// Returns `true` for CLOSE, PING and PONG.
    #[must_use]
    pub const fn is_control(self) -> bool { matches!(self, Self::Close | Self::Ping | Self::Pong) }

    /// Returns `true` for TEXT, BINARY and CONTINUATION.
    #[must_use]
    pub const fn is_data(self) -> bool { !self.is_control() }

    /// Wire value of the opcode.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "CONTINUATION",
            Self::Text => "TEXT",
            Self::Binary => "BINARY",
            Self::Close => "CLOSE",
            Self::Ping => "PING",
            Self::Pong => "PONG",
        };
        f.write_str(name)
    }
}

/// Status codes carried by a CLOSE frame.
///
/// Failures map to a code through
/// [`ProtocolError::close_code`](crate::ProtocolError::close_code); the
/// connection driver queues the CLOSE frame carrying it. Codes received from
/// a peer are kept as-is, including ones without a named variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: normal closure.
    Normal,
    /// 1001: endpoint going away, also used for idle expiry.
    GoingAway,
    /// 1002: protocol violation.
    Protocol,
    /// 1005: the CLOSE frame carried no status. Never written on the wire;
    /// a CLOSE built with it has an empty payload.
    NoStatus,
    /// 1007: payload inconsistent with the message type (bad UTF-8).
    BadPayload,
    /// 1008: generic policy violation.
    Policy,
    /// 1009: message exceeds the configured size limit.
    MessageTooLarge,
    /// 1011: unexpected condition on the server.
    ServerError,
    /// Any other status, such as the 3000-4999 application range.
    Other(u16),
}

impl CloseCode {
    /// Numeric status code as written on the wire.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::Protocol => 1002,
            Self::NoStatus => 1005,
            Self::BadPayload => 1007,
            Self::Policy => 1008,
            Self::MessageTooLarge => 1009,
            Self::ServerError => 1011,
            Self::Other(code) => code,
        }
    }

    /// Map a numeric status code to its variant, falling back to
    /// [`CloseCode::Other`].
    #[must_use]
    pub const fn from_u16(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::Protocol,
            1005 => Self::NoStatus,
            1007 => Self::BadPayload,
            1008 => Self::Policy,
            1009 => Self::MessageTooLarge,
            1011 => Self::ServerError,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.as_u16()) }
}

/// Immutable frame value.
///
/// # Examples
///
/// ```
/// use wiresocket::frame::{Frame, OpCode};
///
/// let frame = Frame::new(OpCode::Text, false, "Hello");
/// assert_eq!(frame.opcode(), OpCode::Text);
/// assert!(!frame.is_fin());
/// assert_eq!(frame.payload().as_ref(), b"Hello");
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    opcode: OpCode,
    fin: bool,
    payload: Bytes,
}

impl Frame {
    /// Create a frame from its parts.
    #[must_use]
    pub fn new(opcode: OpCode, fin: bool, payload: impl Into<Bytes>) -> Self {
        Self {
            opcode,
            fin,
            payload: payload.into(),
        }
    }

    /// Single-frame text message.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self { Self::new(OpCode::Text, true, text.into()) }

    /// Single-frame binary message.
    #[must_use]
    pub fn binary(data: impl Into<Bytes>) -> Self { Self::new(OpCode::Binary, true, data) }

    /// PING frame carrying `payload`.
    #[must_use]
    pub fn ping(payload: impl Into<Bytes>) -> Self { Self::new(OpCode::Ping, true, payload) }

    /// PONG frame carrying `payload`.
    #[must_use]
    pub fn pong(payload: impl Into<Bytes>) -> Self { Self::new(OpCode::Pong, true, payload) }

    /// CLOSE frame with a status code and UTF-8 reason.
    ///
    /// [`CloseCode::NoStatus`] yields an empty payload and drops `reason`.
    #[must_use]
    pub fn close(code: CloseCode, reason: &str) -> Self {
        if code == CloseCode::NoStatus {
            return Self::new(OpCode::Close, true, Bytes::new());
        }
        let mut payload = BytesMut::with_capacity(2 + reason.len());
        payload.put_u16(code.as_u16());
        payload.put_slice(reason.as_bytes());
        Self::new(OpCode::Close, true, payload.freeze())
    }

    /// Frame opcode.
    #[must_use]
    pub const fn opcode(&self) -> OpCode { self.opcode }

    /// Whether this is the final fragment of its message.
    #[must_use]
    pub const fn is_fin(&self) -> bool { self.fin }

    /// Borrow the payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes { &self.payload }

    /// Payload length in bytes.
    #[must_use]
    pub fn payload_len(&self) -> usize { self.payload.len() }

    /// Consume the frame and return its payload.
    #[must_use]
    pub fn into_payload(self) -> Bytes { self.payload }

    /// Status code of a CLOSE frame, if one is present.
    #[must_use]
    pub fn close_status(&self) -> Option<u16> {
        if self.opcode != OpCode::Close || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_be_bytes([self.payload[0], self.payload[1]]))
    }

    /// Close code of a CLOSE frame; [`CloseCode::NoStatus`] when the
    /// payload carries none.
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        if self.opcode != OpCode::Close {
            return None;
        }
        Some(
            self.close_status()
                .map_or(CloseCode::NoStatus, CloseCode::from_u16),
        )
    }

    /// Reason text of a CLOSE frame, lossily decoded.
    #[must_use]
    pub fn close_reason(&self) -> Option<String> {
        self.close_status()?;
        Some(String::from_utf8_lossy(&self.payload[2..]).into_owned())
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[fin={},len={}]",
            self.opcode,
            self.fin,
            self.payload.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use rstest::rstest;

    use super::{CloseCode, Frame, OpCode};

    #[rstest]
    #[case(OpCode::Ping, true)]
    #[case(OpCode::Pong, true)]
    #[case(OpCode::Close, true)]
    #[case(OpCode::Text, false)]
    #[case(OpCode::Binary, false)]
    #[case(OpCode::Continuation, false)]
    fn control_opcodes_are_classified(#[case] opcode: OpCode, #[case] control: bool) {
        assert_eq!(opcode.is_control(), control);
        assert_eq!(opcode.is_data(), !control);
    }

    #[test]
    fn close_frame_carries_status_and_reason() {
        let frame = Frame::close(CloseCode::MessageTooLarge, "too big");
        assert_eq!(frame.close_status(), Some(1009));
        assert_eq!(frame.close_reason().as_deref(), Some("too big"));
        assert_eq!(frame.close_code(), Some(CloseCode::MessageTooLarge));
    }

    #[rstest]
    #[case(1003, CloseCode::Other(1003))]
    #[case(4000, CloseCode::Other(4000))]
    #[case(1001, CloseCode::GoingAway)]
    fn unnamed_codes_survive_a_round_trip(#[case] status: u16, #[case] code: CloseCode) {
        assert_eq!(CloseCode::from_u16(status), code);
        let frame = Frame::close(code, "app");
        assert_eq!(frame.close_status(), Some(status));
        assert_eq!(frame.close_code(), Some(code));
    }

    #[test]
    fn empty_close_has_no_status() {
        let frame = Frame::new(OpCode::Close, true, Bytes::new());
        assert_eq!(frame.close_code(), Some(CloseCode::NoStatus));
        assert!(Frame::close(CloseCode::NoStatus, "ignored").payload().is_empty());
    }

    #[test]
    fn non_close_frames_have_no_status() {
        assert_eq!(Frame::ping("x").close_status(), None);
        assert_eq!(Frame::new(OpCode::Close, true, vec![0x03]).close_status(), None);
    }

    #[test]
    fn display_is_compact() {
        assert_eq!(Frame::text("abc").to_string(), "TEXT[fin=true,len=3]");
    }
}
