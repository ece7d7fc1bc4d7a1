//! Path-to-negotiator mapping.

use std::{fmt, sync::Arc};

use log::{debug, info, warn};

use super::{
    Negotiation,
    NegotiationError,
    PathSpec,
    UpgradeOutcome,
    UpgradeRequest,
    UpgradeResponse,
    Upgraded,
    WebSocketNegotiator,
};
use crate::{
    config::{SessionConfig, WebSocketDefaults},
    metrics,
};

/// Ordered table of path patterns and their negotiators.
///
/// The table is built during setup and read-only while serving. When two
/// patterns match with equal specificity the one registered first wins.
#[derive(Default)]
pub struct WebSocketMapping {
    entries: Vec<(PathSpec, Arc<dyn WebSocketNegotiator>)>,
}

impl WebSocketMapping {
    /// Create an empty mapping.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `negotiator` for the pattern `spec`.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::InvalidPathSpec`] if `spec` does not
    /// parse.
    pub fn add_mapping<N>(&mut self, spec: &str, negotiator: N) -> Result<(), NegotiationError>
    where
        N: WebSocketNegotiator + 'static,
    {
        let spec = PathSpec::parse(spec)?;
        self.add_path_spec(spec, Arc::new(negotiator));
        Ok(())
    }

    /// Register a pre-parsed pattern.
    pub fn add_path_spec(&mut self, spec: PathSpec, negotiator: Arc<dyn WebSocketNegotiator>) {
        debug!("mapping added: spec={spec}");
        self.entries.push((spec, negotiator));
    }

    /// Negotiator registered for exactly the pattern `spec`.
    #[must_use]
    pub fn get_mapping(&self, spec: &str) -> Option<Arc<dyn WebSocketNegotiator>> {
        self.entries
            .iter()
            .find(|(candidate, _)| candidate.as_str() == spec)
            .map(|(_, negotiator)| Arc::clone(negotiator))
    }

    /// Remove every entry for the pattern `spec`. Returns whether any was
    /// removed.
    pub fn remove_mapping(&mut self, spec: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(candidate, _)| candidate.as_str() != spec);
        before != self.entries.len()
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn len(&self) -> usize { self.entries.len() }

    /// Whether no pattern is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// Most specific pattern matching `path`, with its negotiator.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<(&PathSpec, &Arc<dyn WebSocketNegotiator>)> {
        let mut best: Option<&(PathSpec, Arc<dyn WebSocketNegotiator>)> = None;
        for entry in self.entries.iter().filter(|(spec, _)| spec.matches(path)) {
            // Strictly greater, so earlier registrations keep ties.
            if best.is_none_or(|(current, _)| entry.0.specificity() > current.specificity()) {
                best = Some(entry);
            }
        }
        best.map(|(spec, negotiator)| (spec, negotiator))
    }

    /// Attempt to upgrade `request`.
    ///
    /// Returns [`UpgradeOutcome::NotMatched`] without touching `response`
    /// when the request is not a WebSocket upgrade or no pattern matches.
    /// Otherwise the matched negotiator runs with a fresh configuration
    /// seeded from `defaults`, and the outcome reports whether a session
    /// resulted.
    ///
    /// # Errors
    ///
    /// Propagates fatal [`NegotiationError`]s from the negotiator, and
    /// returns [`NegotiationError::ResponseCommitted`] if a negotiator
    /// hands back a handler after committing the response.
    pub fn upgrade(
        &self,
        request: &UpgradeRequest,
        response: &mut UpgradeResponse,
        defaults: &WebSocketDefaults,
    ) -> Result<UpgradeOutcome, NegotiationError> {
        if !request.is_websocket_upgrade() {
            debug!("not a websocket upgrade: path={}", request.path());
            metrics::inc_upgrades("not_matched");
            return Ok(UpgradeOutcome::NotMatched);
        }
        let Some((spec, negotiator)) = self.find(request.path()) else {
            debug!("no mapping for upgrade: path={}", request.path());
            metrics::inc_upgrades("not_matched");
            return Ok(UpgradeOutcome::NotMatched);
        };

        let config = SessionConfig::new(defaults);
        negotiator.customize(&config);
        let mut negotiation = Negotiation {
            request,
            response: &mut *response,
            config: &config,
        };
        let negotiated = match negotiator.negotiate(&mut negotiation) {
            Ok(Some(negotiated)) => negotiated,
            Ok(None) => {
                warn!(
                    "upgrade refused: path={}, spec={spec}, status={}",
                    request.path(),
                    response.status()
                );
                metrics::inc_upgrades("refused");
                return Ok(UpgradeOutcome::Refused);
            }
            Err(error) => {
                warn!("upgrade failed: path={}, error={error}", request.path());
                metrics::inc_upgrades("failed");
                return Err(error);
            }
        };

        if let Err(error) =
            response.accept(negotiated.subprotocol.as_deref(), &negotiated.extensions)
        {
            warn!("upgrade failed: path={}, error={error}", request.path());
            metrics::inc_upgrades("failed");
            return Err(error);
        }
        info!(
            "connection upgraded: path={}, spec={spec}, subprotocol={:?}",
            request.path(),
            negotiated.subprotocol
        );
        metrics::inc_upgrades("upgraded");
        Ok(UpgradeOutcome::Upgraded(Upgraded {
            handler: negotiated.handler,
            config,
            subprotocol: negotiated.subprotocol,
            extensions: negotiated.extensions,
            path: request.path().to_owned(),
        }))
    }
}

impl fmt::Debug for WebSocketMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(spec, _)| spec.as_str()))
            .finish()
    }
}
