//! Upgrade request and response as seen by negotiation.
//!
//! These are deliberately small views over the hosting HTTP layer: the
//! request exposes method, path and headers, and the response records a
//! status, headers and whether it has been committed. Once committed, a
//! response refuses further writes.

use std::{fmt, sync::Arc};

use http::{
    HeaderMap,
    HeaderName,
    HeaderValue,
    Method,
    StatusCode,
    header::{
        CONNECTION,
        SEC_WEBSOCKET_EXTENSIONS,
        SEC_WEBSOCKET_KEY,
        SEC_WEBSOCKET_PROTOCOL,
        SEC_WEBSOCKET_VERSION,
        UPGRADE,
    },
};

use super::NegotiationError;

/// Context owning a mapped path, entered while the creator runs.
///
/// Hosts use this to install whatever ambient state application code
/// expects, such as thread-locals or a tracing span.
pub trait ExecutionContext: Send + Sync {
    /// Run `task` inside this context. `task` must be called exactly once.
    fn run(&self, task: &mut dyn FnMut());
}

/// [`ExecutionContext`] that runs tasks on the calling thread unchanged.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineContext;

impl ExecutionContext for InlineContext {
    fn run(&self, task: &mut dyn FnMut()) { task(); }
}

/// Inbound upgrade request.
///
/// # Examples
///
/// ```
/// use http::{Method, header};
/// use wiresocket::negotiation::UpgradeRequest;
///
/// let request = UpgradeRequest::new(Method::GET, "/chat")
///     .with_header(header::UPGRADE, "websocket")
///     .with_header(header::CONNECTION, "keep-alive, Upgrade")
///     .with_header(header::SEC_WEBSOCKET_VERSION, "13")
///     .with_header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
///     .with_header(header::SEC_WEBSOCKET_PROTOCOL, "chat, superchat");
/// assert!(request.is_websocket_upgrade());
/// assert_eq!(request.offered_subprotocols(), ["chat", "superchat"]);
/// ```
#[derive(Clone)]
pub struct UpgradeRequest {
    method: Method,
    path: String,
    headers: HeaderMap,
    context: Option<Arc<dyn ExecutionContext>>,
}

impl UpgradeRequest {
    /// Create a request with no headers and no execution context.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            context: None,
        }
    }

    /// Copy method, path and headers from an [`http::Request`].
    #[must_use]
    pub fn from_http<B>(request: &http::Request<B>) -> Self {
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_owned(),
            headers: request.headers().clone(),
            context: None,
        }
    }

    /// Append a header. Values that are not valid header text are ignored.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.append(name, value);
        }
        self
    }

    /// Attach the execution context owning this request's path.
    #[must_use]
    pub fn with_context(mut self, context: Arc<dyn ExecutionContext>) -> Self {
        self.context = Some(context);
        self
    }

    /// Request method.
    #[must_use]
    pub fn method(&self) -> &Method { &self.method }

    /// Request path, without query.
    #[must_use]
    pub fn path(&self) -> &str { &self.path }

    /// All request headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Execution context, if the host supplied one.
    #[must_use]
    pub fn context(&self) -> Option<&Arc<dyn ExecutionContext>> { self.context.as_ref() }

    /// First value of `name` as text.
    #[must_use]
    pub fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    /// Whether this is a version 13 WebSocket upgrade request.
    #[must_use]
    pub fn is_websocket_upgrade(&self) -> bool {
        self.method == Method::GET
            && self
                .header(&UPGRADE)
                .is_some_and(|value| value.trim().eq_ignore_ascii_case("websocket"))
            && self.tokens(&CONNECTION).any(|token| token.eq_ignore_ascii_case("upgrade"))
            && self.header(&SEC_WEBSOCKET_VERSION).map(str::trim) == Some("13")
            && self.headers.contains_key(SEC_WEBSOCKET_KEY)
    }

    /// Subprotocols offered by the client, in preference order.
    #[must_use]
    pub fn offered_subprotocols(&self) -> Vec<String> {
        self.tokens(&SEC_WEBSOCKET_PROTOCOL).map(str::to_owned).collect()
    }

    /// Extension offers, each with its parameters, in preference order.
    #[must_use]
    pub fn offered_extensions(&self) -> Vec<String> {
        self.tokens(&SEC_WEBSOCKET_EXTENSIONS).map(str::to_owned).collect()
    }

    /// Comma-separated elements across every value of `name`.
    fn tokens<'a>(&'a self, name: &HeaderName) -> impl Iterator<Item = &'a str> + use<'a> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

impl fmt::Debug for UpgradeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpgradeRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("context", &self.context.is_some())
            .finish()
    }
}

/// Response to an upgrade request.
#[derive(Clone, Debug)]
pub struct UpgradeResponse {
    status: StatusCode,
    reason: Option<String>,
    headers: HeaderMap,
    committed: bool,
}

impl Default for UpgradeResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            reason: None,
            headers: HeaderMap::new(),
            committed: false,
        }
    }
}

impl UpgradeResponse {
    /// An uncommitted `200 OK` response.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StatusCode { self.status }

    /// Reason given with an error status.
    #[must_use]
    pub fn reason(&self) -> Option<&str> { self.reason.as_deref() }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Whether a final status has been written.
    #[must_use]
    pub fn is_committed(&self) -> bool { self.committed }

    /// Set the status without committing.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::ResponseCommitted`] if already committed.
    pub fn set_status(&mut self, status: StatusCode) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.status = status;
        Ok(())
    }

    /// Set a header, replacing earlier values.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::ResponseCommitted`] if already committed,
    /// or [`NegotiationError::InvalidHeader`] for a value HTTP cannot carry.
    pub fn set_header(&mut self, name: HeaderName, value: &str) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let value = header_value(&name, value)?;
        self.headers.insert(name, value);
        Ok(())
    }

    /// Echo the subprotocol chosen for the session.
    ///
    /// # Errors
    ///
    /// See [`set_header`](Self::set_header).
    pub fn set_accepted_subprotocol(&mut self, subprotocol: &str) -> Result<(), NegotiationError> {
        self.set_header(SEC_WEBSOCKET_PROTOCOL, subprotocol)
    }

    /// Echo the extensions accepted for the session.
    ///
    /// # Errors
    ///
    /// See [`set_header`](Self::set_header).
    pub fn set_extensions(&mut self, extensions: &[String]) -> Result<(), NegotiationError> {
        self.set_header(SEC_WEBSOCKET_EXTENSIONS, &extensions.join(", "))
    }

    /// Write `101 Switching Protocols` with the negotiated headers and commit.
    ///
    /// Every header value is checked before anything is written, so a
    /// failure leaves the response as it was.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::ResponseCommitted`] if already committed,
    /// or [`NegotiationError::InvalidHeader`] for a value HTTP cannot carry.
    pub fn accept(
        &mut self,
        subprotocol: Option<&str>,
        extensions: &[String],
    ) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        let subprotocol = subprotocol
            .map(|value| header_value(&SEC_WEBSOCKET_PROTOCOL, value))
            .transpose()?;
        let extensions = (!extensions.is_empty())
            .then(|| header_value(&SEC_WEBSOCKET_EXTENSIONS, &extensions.join(", ")))
            .transpose()?;

        self.status = StatusCode::SWITCHING_PROTOCOLS;
        if let Some(value) = subprotocol {
            self.headers.insert(SEC_WEBSOCKET_PROTOCOL, value);
        }
        if let Some(value) = extensions {
            self.headers.insert(SEC_WEBSOCKET_EXTENSIONS, value);
        }
        self.committed = true;
        Ok(())
    }

    /// Write a final error status and commit.
    ///
    /// # Errors
    ///
    /// Returns [`NegotiationError::ResponseCommitted`] if already committed.
    pub fn send_error(&mut self, status: StatusCode, reason: &str) -> Result<(), NegotiationError> {
        self.ensure_open()?;
        self.status = status;
        self.reason = Some(reason.to_owned());
        self.committed = true;
        Ok(())
    }

    /// Commit the response with its current status.
    pub fn commit(&mut self) { self.committed = true; }

    fn ensure_open(&self) -> Result<(), NegotiationError> {
        if self.committed {
            Err(NegotiationError::ResponseCommitted {
                status: self.status,
            })
        } else {
            Ok(())
        }
    }
}

fn header_value(name: &HeaderName, value: &str) -> Result<HeaderValue, NegotiationError> {
    HeaderValue::from_str(value).map_err(|_| NegotiationError::InvalidHeader {
        name: header_label(name),
    })
}

fn header_label(name: &HeaderName) -> &'static str {
    if *name == SEC_WEBSOCKET_PROTOCOL {
        "sec-websocket-protocol"
    } else if *name == SEC_WEBSOCKET_EXTENSIONS {
        "sec-websocket-extensions"
    } else {
        "response header"
    }
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, header};
    use rstest::{fixture, rstest};

    use super::{UpgradeRequest, UpgradeResponse};
    use crate::negotiation::NegotiationError;

    #[fixture]
    fn upgrade() -> UpgradeRequest {
        UpgradeRequest::new(Method::GET, "/chat")
            .with_header(header::UPGRADE, "WebSocket")
            .with_header(header::CONNECTION, "keep-alive, Upgrade")
            .with_header(header::SEC_WEBSOCKET_VERSION, "13")
            .with_header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
    }

    #[rstest]
    fn recognises_upgrade(upgrade: UpgradeRequest) {
        assert!(upgrade.is_websocket_upgrade());
    }

    #[test]
    fn rejects_wrong_version() {
        let request = UpgradeRequest::new(Method::GET, "/chat")
            .with_header(header::UPGRADE, "websocket")
            .with_header(header::CONNECTION, "Upgrade")
            .with_header(header::SEC_WEBSOCKET_VERSION, "8")
            .with_header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==");
        assert!(!request.is_websocket_upgrade());
    }

    #[test]
    fn copies_http_request_parts() {
        let request = http::Request::builder()
            .method(Method::GET)
            .uri("/chat?room=1")
            .header(header::UPGRADE, "websocket")
            .body(())
            .expect("request");
        let request = UpgradeRequest::from_http(&request);
        assert_eq!(request.path(), "/chat");
        assert_eq!(request.header(&header::UPGRADE), Some("websocket"));
        assert!(request.context().is_none());
    }

    #[test]
    fn rejects_plain_get() {
        assert!(!UpgradeRequest::new(Method::GET, "/chat").is_websocket_upgrade());
    }

    #[rstest]
    fn rejects_post(upgrade: UpgradeRequest) {
        let mut request = UpgradeRequest::new(Method::POST, "/chat");
        for (name, value) in upgrade.headers() {
            request = request.with_header(name.clone(), value.to_str().expect("ascii"));
        }
        assert!(!request.is_websocket_upgrade());
    }

    #[rstest]
    fn collects_offers_across_header_lines(upgrade: UpgradeRequest) {
        let request = upgrade
            .with_header(header::SEC_WEBSOCKET_PROTOCOL, "chat, ")
            .with_header(header::SEC_WEBSOCKET_PROTOCOL, "superchat")
            .with_header(
                header::SEC_WEBSOCKET_EXTENSIONS,
                "permessage-deflate; client_max_window_bits",
            );
        assert_eq!(request.offered_subprotocols(), ["chat", "superchat"]);
        assert_eq!(
            request.offered_extensions(),
            ["permessage-deflate; client_max_window_bits"]
        );
    }

    #[test]
    fn committed_response_is_never_overwritten() {
        let mut response = UpgradeResponse::new();
        response
            .send_error(StatusCode::FORBIDDEN, "nope")
            .expect("first write");
        assert!(response.is_committed());
        assert_eq!(
            response.send_error(StatusCode::SERVICE_UNAVAILABLE, "late"),
            Err(NegotiationError::ResponseCommitted {
                status: StatusCode::FORBIDDEN
            })
        );
        assert!(response.set_status(StatusCode::SWITCHING_PROTOCOLS).is_err());
        assert!(response.set_accepted_subprotocol("chat").is_err());
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(response.reason(), Some("nope"));
    }

    #[test]
    fn invalid_header_value_is_rejected() {
        let mut response = UpgradeResponse::new();
        assert_eq!(
            response.set_accepted_subprotocol("bad\nvalue"),
            Err(NegotiationError::InvalidHeader {
                name: "sec-websocket-protocol"
            })
        );
    }
}
