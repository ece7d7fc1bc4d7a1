//! Errors raised while negotiating an upgrade.

use http::StatusCode;
use thiserror::Error;

/// Fatal failures that abort an upgrade attempt.
///
/// Ordinary refusals (no matching path, a creator declining) are reported
/// through [`UpgradeOutcome`](super::UpgradeOutcome) instead.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum NegotiationError {
    /// The request carries no execution context to run the creator in.
    #[error("upgrade request has no execution context")]
    MissingContext,
    /// A path pattern could not be parsed.
    #[error("invalid path spec {spec:?}: {reason}")]
    InvalidPathSpec {
        /// The rejected pattern.
        spec: String,
        /// Why it was rejected.
        reason: &'static str,
    },
    /// The response was already committed and cannot be changed.
    #[error("response already committed with status {status}")]
    ResponseCommitted {
        /// Status the response was committed with.
        status: StatusCode,
    },
    /// A header value contained characters HTTP does not allow.
    #[error("invalid value for header {name}")]
    InvalidHeader {
        /// Name of the header being written.
        name: &'static str,
    },
}
