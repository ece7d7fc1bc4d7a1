//! Negotiators turn a matched upgrade request into a frame handler.

use std::{fmt, marker::PhantomData};

use http::StatusCode;
use log::debug;

use super::{NegotiationError, UpgradeRequest, UpgradeResponse};
use crate::{
    config::{ConfigOverrides, SessionConfig},
    hooks::{FrameHandler, MessageHooks},
    message_assembler::MessageHandler,
};

/// Reason sent with the refusal written when a creator declines.
pub const CREATION_REFUSED: &str = "WebSocket Endpoint Creation Refused";

/// Transient state of one upgrade attempt.
///
/// `config` already holds the container defaults and any negotiator
/// customisation; factories apply endpoint declarations on top.
pub struct Negotiation<'a> {
    /// The inbound request.
    pub request: &'a UpgradeRequest,
    /// The response being built; may be committed by the creator.
    pub response: &'a mut UpgradeResponse,
    /// Live configuration the new session will use.
    pub config: &'a SessionConfig,
}

/// Frame handler produced by a successful negotiation.
pub struct NegotiatedHandler {
    /// Handler to drive with the session's frames.
    pub handler: Box<dyn FrameHandler>,
    /// Subprotocol chosen from the client's offers.
    pub subprotocol: Option<String>,
    /// Extension offers accepted for the session.
    pub extensions: Vec<String>,
}

impl fmt::Debug for NegotiatedHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NegotiatedHandler")
            .field("subprotocol", &self.subprotocol)
            .field("extensions", &self.extensions)
            .finish_non_exhaustive()
    }
}

/// Resolves one upgrade attempt for a mapped path.
pub trait WebSocketNegotiator: Send + Sync {
    /// Adjust the session configuration before negotiation runs.
    fn customize(&self, _config: &SessionConfig) {}

    /// Negotiate the upgrade.
    ///
    /// `Ok(None)` means the attempt was handled without producing a
    /// session: the response is committed, either by the negotiator or by
    /// application code it ran.
    ///
    /// # Errors
    ///
    /// Returns a [`NegotiationError`] for conditions that must abort the
    /// attempt, such as a request without an execution context.
    fn negotiate(
        &self,
        negotiation: &mut Negotiation<'_>,
    ) -> Result<Option<NegotiatedHandler>, NegotiationError>;
}

/// Builds a frame handler from an application endpoint of type `E`.
pub trait FrameHandlerFactory<E>: Send + Sync {
    /// Bind `endpoint` to a frame handler for the session being negotiated.
    fn new_frame_handler(&self, endpoint: E, negotiation: &Negotiation<'_>) -> NegotiatedHandler;
}

/// Application endpoint: message hooks plus what it declares about itself.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wiresocket::{config::ConfigOverrides, hooks::MessageHooks, negotiation::Endpoint};
///
/// let endpoint = Endpoint::new(MessageHooks::new())
///     .declare(ConfigOverrides::default().idle_timeout(Duration::from_secs(7200)))
///     .subprotocol("chat");
/// let offered = ["superchat".to_owned(), "chat".to_owned()];
/// assert_eq!(endpoint.select_subprotocol(&offered), Some("chat".to_owned()));
/// ```
#[derive(Debug, Default)]
pub struct Endpoint {
    hooks: MessageHooks,
    declared: ConfigOverrides,
    subprotocols: Vec<String>,
    extensions: Vec<String>,
}

impl Endpoint {
    /// Endpoint delivering messages to `hooks`.
    #[must_use]
    pub fn new(hooks: MessageHooks) -> Self {
        Self {
            hooks,
            ..Self::default()
        }
    }

    /// Declare configuration this endpoint requires.
    #[must_use]
    pub fn declare(mut self, overrides: ConfigOverrides) -> Self {
        self.declared = overrides;
        self
    }

    /// Add a supported subprotocol.
    #[must_use]
    pub fn subprotocol(mut self, name: impl Into<String>) -> Self {
        self.subprotocols.push(name.into());
        self
    }

    /// Add a supported extension by name.
    #[must_use]
    pub fn extension(mut self, name: impl Into<String>) -> Self {
        self.extensions.push(name.into());
        self
    }

    /// Declared configuration.
    #[must_use]
    pub fn declared(&self) -> &ConfigOverrides { &self.declared }

    /// First offered subprotocol this endpoint supports.
    #[must_use]
    pub fn select_subprotocol(&self, offered: &[String]) -> Option<String> {
        offered
            .iter()
            .find(|offer| self.subprotocols.iter().any(|name| name == *offer))
            .cloned()
    }

    /// Offered extensions whose name this endpoint supports.
    #[must_use]
    pub fn select_extensions(&self, offered: &[String]) -> Vec<String> {
        offered
            .iter()
            .filter(|offer| {
                let name = offer.split(';').next().unwrap_or_default().trim();
                self.extensions.iter().any(|supported| supported == name)
            })
            .cloned()
            .collect()
    }
}

/// Default factory turning an [`Endpoint`] into a [`MessageHandler`].
#[derive(Clone, Copy, Debug, Default)]
pub struct MessageHandlerFactory;

impl FrameHandlerFactory<Endpoint> for MessageHandlerFactory {
    fn new_frame_handler(&self, endpoint: Endpoint, negotiation: &Negotiation<'_>) -> NegotiatedHandler {
        endpoint.declared.apply_to(negotiation.config);
        let subprotocol = endpoint.select_subprotocol(&negotiation.request.offered_subprotocols());
        let extensions = endpoint.select_extensions(&negotiation.request.offered_extensions());
        NegotiatedHandler {
            handler: Box::new(MessageHandler::new(endpoint.hooks, negotiation.config.clone())),
            subprotocol,
            extensions,
        }
    }
}

/// Negotiator that runs an application creator inside the request's
/// execution context.
///
/// The creator may commit the response itself, in which case no session
/// is created. If it returns no endpoint and leaves the response open, a
/// `503 Service Unavailable` refusal is written.
///
/// # Examples
///
/// ```
/// use wiresocket::{
///     hooks::MessageHooks,
///     negotiation::{CreatorNegotiator, Endpoint, MessageHandlerFactory},
/// };
///
/// let negotiator = CreatorNegotiator::new(
///     |_request, _response| Some(Endpoint::new(MessageHooks::new())),
///     MessageHandlerFactory,
/// );
/// # let _ = negotiator;
/// ```
pub struct CreatorNegotiator<E, C, F> {
    creator: C,
    factory: F,
    customizer: ConfigOverrides,
    _endpoint: PhantomData<fn() -> E>,
}

impl<E, C, F> CreatorNegotiator<E, C, F>
where
    C: Fn(&UpgradeRequest, &mut UpgradeResponse) -> Option<E> + Send + Sync,
    F: FrameHandlerFactory<E>,
{
    /// Pair a creator with the factory that binds its endpoints.
    pub fn new(creator: C, factory: F) -> Self {
        Self {
            creator,
            factory,
            customizer: ConfigOverrides::default(),
            _endpoint: PhantomData,
        }
    }

    /// Configuration applied before the creator runs.
    #[must_use]
    pub fn customize_with(mut self, overrides: ConfigOverrides) -> Self {
        self.customizer = overrides;
        self
    }
}

impl<E, C, F> WebSocketNegotiator for CreatorNegotiator<E, C, F>
where
    C: Fn(&UpgradeRequest, &mut UpgradeResponse) -> Option<E> + Send + Sync,
    F: FrameHandlerFactory<E>,
{
    fn customize(&self, config: &SessionConfig) { self.customizer.apply_to(config); }

    fn negotiate(
        &self,
        negotiation: &mut Negotiation<'_>,
    ) -> Result<Option<NegotiatedHandler>, NegotiationError> {
        let request = negotiation.request;
        let context = request.context().ok_or(NegotiationError::MissingContext)?;

        let mut created = None;
        {
            let response = &mut *negotiation.response;
            let creator = &self.creator;
            context.run(&mut || created = Some(creator(request, response)));
        }

        if negotiation.response.is_committed() {
            debug!(
                "creator committed response: path={}, status={}",
                request.path(),
                negotiation.response.status()
            );
            return Ok(None);
        }
        let Some(endpoint) = created.flatten() else {
            negotiation
                .response
                .send_error(StatusCode::SERVICE_UNAVAILABLE, CREATION_REFUSED)?;
            return Ok(None);
        };
        Ok(Some(self.factory.new_frame_handler(endpoint, negotiation)))
    }
}

impl<E, C, F> fmt::Debug for CreatorNegotiator<E, C, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CreatorNegotiator")
            .field("customizer", &self.customizer)
            .finish_non_exhaustive()
    }
}
