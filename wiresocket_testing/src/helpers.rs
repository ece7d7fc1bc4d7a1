//! Builders and drivers for exercising upgrades and connections in tests.

use std::sync::{Arc, Mutex};

use futures::stream;
use http::{Method, header};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiresocket::{
    ProtocolError,
    connection::Connection,
    frame::Frame,
    hooks::MessageHooks,
    negotiation::{InlineContext, UpgradeRequest},
    session::OutboundFrame,
};

/// Sample key from RFC 6455 section 1.3.
pub const SAMPLE_KEY: &str = "dGhlIHNhbXBsZSBub25jZQ==";

/// A well-formed upgrade request for `path` that runs creators inline.
#[must_use]
pub fn upgrade_request(path: &str) -> UpgradeRequest {
    UpgradeRequest::new(Method::GET, path)
        .with_header(header::UPGRADE, "websocket")
        .with_header(header::CONNECTION, "keep-alive, Upgrade")
        .with_header(header::SEC_WEBSOCKET_VERSION, "13")
        .with_header(header::SEC_WEBSOCKET_KEY, SAMPLE_KEY)
        .with_context(Arc::new(InlineContext))
}

/// Ordered log of what a connection's hooks observed.
#[derive(Clone, Debug, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    /// Append an event.
    ///
    /// # Panics
    ///
    /// Panics if another holder of the log panicked.
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().expect("recorder poisoned").push(event.into());
    }

    /// Events recorded so far.
    ///
    /// # Panics
    ///
    /// Panics if another holder of the log panicked.
    #[must_use]
    pub fn events(&self) -> Vec<String> { self.0.lock().expect("recorder poisoned").clone() }

    /// Hooks that record every message and lifecycle event and accept
    /// each message immediately.
    #[must_use]
    pub fn hooks(&self) -> MessageHooks {
        let text = self.clone();
        let binary = self.clone();
        let error = self.clone();
        let closed = self.clone();
        MessageHooks::new()
            .on_text(move |message, completion| {
                text.push(format!("text:{message}"));
                completion.succeed();
            })
            .on_binary(move |data, completion| {
                binary.push(format!("binary:{}", data.len()));
                completion.succeed();
            })
            .on_error(move |failure| error.push(format!("error:{}", failure.kind_label())))
            .on_closed(move |code| closed.push(format!("closed:{}", code.as_u16())))
    }
}

/// Collect every frame queued on `outbound` so far.
pub fn drain_outbound(outbound: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<Frame> {
    std::iter::from_fn(|| outbound.try_recv().ok())
        .map(|queued| queued.frame)
        .collect()
}

/// Run `connection` over `frames` to completion and return its result
/// together with every frame it sent.
pub async fn drive_frames<I>(
    connection: Connection,
    mut outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    frames: I,
) -> (Result<(), ProtocolError>, Vec<Frame>)
where
    I: IntoIterator<Item = Frame>,
{
    let frames: Vec<Frame> = frames.into_iter().collect();
    let result = connection
        .run(stream::iter(frames), CancellationToken::new())
        .await;
    (result, drain_outbound(&mut outbound))
}
