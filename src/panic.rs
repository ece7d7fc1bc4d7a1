//! Readable panic payloads for connection task logging.

use std::{any::Any, fmt};

/// Display adapter for a payload caught from a panicking task.
///
/// String payloads print as-is; anything else falls back to `Debug`.
///
/// ```
/// use wiresocket::panic::PanicMessage;
///
/// assert_eq!(PanicMessage::new(Box::new("boom")).to_string(), "boom");
/// assert_eq!(PanicMessage::new(Box::new(String::from("bang"))).to_string(), "bang");
/// assert!(PanicMessage::new(Box::new(7_u8)).to_string().contains("Any"));
/// ```
#[derive(Debug)]
#[must_use]
pub struct PanicMessage(Box<dyn Any + Send>);

impl PanicMessage {
    /// Wrap a payload returned by `catch_unwind`.
    pub fn new(payload: Box<dyn Any + Send>) -> Self { Self(payload) }

    /// Payload text when the panic carried a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0
            .downcast_ref::<String>()
            .map(String::as_str)
            .or_else(|| self.0.downcast_ref::<&'static str>().copied())
    }
}

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) => f.write_str(text),
            None => write!(f, "{:?}", self.0),
        }
    }
}
