//! Upgrade negotiation.
//!
//! A [`WebSocketMapping`] resolves an upgrade request to the negotiator
//! registered for the most specific matching [`PathSpec`]. The negotiator
//! runs application code under the request's [`ExecutionContext`] and
//! either produces a frame handler or commits a refusal. On success the
//! caller receives an [`Upgraded`] value carrying the handler and the live
//! [`SessionConfig`] it was built with, ready to be driven by a
//! [`Connection`].
//!
//! Configuration is layered in a fixed order: container
//! [`WebSocketDefaults`](crate::config::WebSocketDefaults), then the
//! negotiator's customisation, then the endpoint's declarations, then any
//! runtime change made through the session once open.

mod error;
mod handler;
mod mapping;
mod negotiator;
mod path_spec;
mod request;

use std::fmt;

pub use error::NegotiationError;
pub use handler::WebSocketUpgradeHandler;
pub use mapping::WebSocketMapping;
pub use negotiator::{
    CREATION_REFUSED,
    CreatorNegotiator,
    Endpoint,
    FrameHandlerFactory,
    MessageHandlerFactory,
    NegotiatedHandler,
    Negotiation,
    WebSocketNegotiator,
};
pub use path_spec::{PathSpec, PathSpecGroup};
pub use request::{ExecutionContext, InlineContext, UpgradeRequest, UpgradeResponse};
use tokio::sync::mpsc;

use crate::{
    config::SessionConfig,
    connection::Connection,
    hooks::FrameHandler,
    session::{ChannelSession, ConnectionId, OutboundFrame},
};

/// Result of an upgrade attempt.
#[derive(Debug)]
pub enum UpgradeOutcome {
    /// Not an upgrade request, or no pattern matched. The response is
    /// untouched and the caller should continue with ordinary handling.
    NotMatched,
    /// A negotiator handled the request without creating a session; the
    /// response is committed.
    Refused,
    /// The upgrade succeeded.
    Upgraded(Upgraded),
}

impl UpgradeOutcome {
    /// Whether a negotiator took responsibility for the request.
    #[must_use]
    pub fn is_handled(&self) -> bool { !matches!(self, Self::NotMatched) }
}

/// A successfully negotiated session, not yet connected to a transport.
pub struct Upgraded {
    pub(crate) handler: Box<dyn FrameHandler>,
    pub(crate) config: SessionConfig,
    pub(crate) subprotocol: Option<String>,
    pub(crate) extensions: Vec<String>,
    pub(crate) path: String,
}

impl Upgraded {
    /// Path of the upgraded request.
    #[must_use]
    pub fn path(&self) -> &str { &self.path }

    /// Negotiated subprotocol.
    #[must_use]
    pub fn subprotocol(&self) -> Option<&str> { self.subprotocol.as_deref() }

    /// Accepted extension offers.
    #[must_use]
    pub fn extensions(&self) -> &[String] { &self.extensions }

    /// Live configuration shared by the handler.
    #[must_use]
    pub fn config(&self) -> &SessionConfig { &self.config }

    /// Take the frame handler for a custom transport.
    #[must_use]
    pub fn into_handler(self) -> Box<dyn FrameHandler> { self.handler }

    /// Bind the handler to a [`ChannelSession`] sharing its configuration.
    ///
    /// The returned receiver yields the frames the writer must put on the
    /// wire.
    #[must_use]
    pub fn into_connection(
        self,
        id: ConnectionId,
    ) -> (Connection, mpsc::UnboundedReceiver<OutboundFrame>) {
        let (session, outbound) = ChannelSession::new(id, self.config);
        (Connection::new(self.handler, session), outbound)
    }
}

impl fmt::Debug for Upgraded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Upgraded")
            .field("path", &self.path)
            .field("subprotocol", &self.subprotocol)
            .field("extensions", &self.extensions)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
