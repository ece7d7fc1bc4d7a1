#![doc(html_root_url = "https://docs.rs/wiresocket/latest")]
//! Public API for the `wiresocket` library.
//!
//! This crate provides the protocol engine behind a WebSocket server:
//! upgrade negotiation against a path mapping, reassembly of fragmented
//! frames into application messages and idle-timeout supervision of open
//! connections. Socket I/O and frame encoding stay with the transport that
//! embeds it.

pub mod completion;
pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod hooks;
pub mod idle;
pub mod message_assembler;
pub mod metrics;
pub mod negotiation;
pub mod panic;
pub mod session;
pub mod utf8;

/// Result type alias for fallible protocol operations.
pub use error::Result;

pub use completion::{Completion, CompletionFuture};
pub use config::{ConfigOverrides, SessionConfig, WebSocketDefaults};
pub use connection::{Connection, active_connection_count, spawn_connection};
pub use error::ProtocolError;
pub use frame::{CloseCode, Frame, OpCode};
pub use hooks::{FrameHandler, MessageHooks};
pub use idle::{IdleState, IdleSupervisor, IdleTimeout};
pub use message_assembler::{AssembledMessage, MessageHandler, MessageKind};
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED};
pub use negotiation::{
    NegotiationError,
    UpgradeOutcome,
    UpgradeRequest,
    UpgradeResponse,
    WebSocketMapping,
    WebSocketNegotiator,
    WebSocketUpgradeHandler,
};
pub use session::{ChannelSession, ConnectionId, CoreSession, OutboundFrame};
