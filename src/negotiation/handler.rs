//! Adapter placing a [`WebSocketMapping`] in front of ordinary request
//! handling.

use super::{
    NegotiationError,
    UpgradeOutcome,
    UpgradeRequest,
    UpgradeResponse,
    Upgraded,
    WebSocketMapping,
    WebSocketNegotiator,
};
use crate::config::WebSocketDefaults;

/// Hosting-layer handler that upgrades mapped requests and passes the rest
/// on.
///
/// # Examples
///
/// ```
/// use http::Method;
/// use wiresocket::{
///     config::WebSocketDefaults,
///     negotiation::{UpgradeRequest, UpgradeResponse, WebSocketUpgradeHandler},
/// };
///
/// let handler = WebSocketUpgradeHandler::new(WebSocketDefaults::default());
/// let request = UpgradeRequest::new(Method::GET, "/index.html");
/// let mut response = UpgradeResponse::new();
/// let mut served = false;
/// let upgraded = handler
///     .handle(&request, &mut response, |_, _| served = true)
///     .expect("no fatal error");
/// assert!(upgraded.is_none());
/// assert!(served);
/// ```
#[derive(Debug, Default)]
pub struct WebSocketUpgradeHandler {
    mapping: WebSocketMapping,
    defaults: WebSocketDefaults,
}

impl WebSocketUpgradeHandler {
    /// Handler with an empty mapping.
    #[must_use]
    pub fn new(defaults: WebSocketDefaults) -> Self {
        Self {
            mapping: WebSocketMapping::new(),
            defaults,
        }
    }

    /// Handler serving an existing mapping.
    #[must_use]
    pub fn with_mapping(mapping: WebSocketMapping, defaults: WebSocketDefaults) -> Self {
        Self { mapping, defaults }
    }

    /// Register `negotiator` for `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidPathSpec`] if `spec` does not
    /// parse.
    pub fn add_mapping<N>(&mut self, spec: &str, negotiator: N) -> Result<(), NegotiationError>
    where
        N: WebSocketNegotiator + 'static,
    {
        self.mapping.add_mapping(spec, negotiator)
    }

    /// The mapping consulted for each request.
    #[must_use]
    pub fn mapping(&self) -> &WebSocketMapping { &self.mapping }

    /// Container defaults applied to upgraded sessions.
    #[must_use]
    pub fn defaults(&self) -> &WebSocketDefaults { &self.defaults }

    /// Upgrade `request` if it is mapped, otherwise hand it to `next`.
    ///
    /// `next` runs only when no mapping claimed the request and the
    /// response is still uncommitted.
    ///
    /// # Errors
    ///
    /// Propagates fatal errors from [`WebSocketMapping::upgrade`].
    pub fn handle<N>(
        &self,
        request: &UpgradeRequest,
        response: &mut UpgradeResponse,
        next: N,
    ) -> Result<Option<Upgraded>, NegotiationError>
    where
        N: FnOnce(&UpgradeRequest, &mut UpgradeResponse),
    {
        match self.mapping.upgrade(request, response, &self.defaults)? {
            UpgradeOutcome::Upgraded(upgraded) => Ok(Some(upgraded)),
            UpgradeOutcome::Refused => Ok(None),
            UpgradeOutcome::NotMatched => {
                if !response.is_committed() {
                    next(request, response);
                }
                Ok(None)
            }
        }
    }
}
