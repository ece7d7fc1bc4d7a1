//! Session configuration.
//!
//! [`WebSocketDefaults`] holds container-wide values applied when a
//! connection is upgraded. [`SessionConfig`] is the live, shared
//! configuration of a single session: the message assembler reads it on
//! every frame and the idle supervisor on every check, so a change made at
//! any point in the session takes effect on the next frame or check.
//! [`ConfigOverrides`] carries partial updates from negotiators, endpoint
//! declarations and runtime calls.

use std::{
    num::NonZeroUsize,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde::Deserialize;

use crate::message_assembler::MessageKind;

/// Default idle timeout (30 seconds).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);
/// Default per-message size limit (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Container-wide defaults applied to every upgraded connection.
///
/// A size limit of `0` disables the limit; an idle timeout of `0`
/// disables idle expiry.
///
/// # Examples
///
/// ```
/// use wiresocket::config::WebSocketDefaults;
///
/// let defaults = WebSocketDefaults::default().with_idle_timeout_ms(88_088);
/// assert_eq!(defaults.idle_timeout_ms, 88_088);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WebSocketDefaults {
    /// Idle timeout in milliseconds.
    pub idle_timeout_ms: u64,
    /// Maximum size of an assembled text message, in bytes.
    pub max_text_message_size: usize,
    /// Maximum size of an assembled binary message, in bytes.
    pub max_binary_message_size: usize,
}

impl Default for WebSocketDefaults {
    fn default() -> Self {
        Self {
            idle_timeout_ms: duration_to_millis(DEFAULT_IDLE_TIMEOUT),
            max_text_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_binary_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl WebSocketDefaults {
    /// Replace the idle timeout.
    #[must_use]
    pub const fn with_idle_timeout_ms(mut self, millis: u64) -> Self {
        self.idle_timeout_ms = millis;
        self
    }

    /// Replace both message size limits.
    #[must_use]
    pub const fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_text_message_size = bytes;
        self.max_binary_message_size = bytes;
        self
    }

    /// Idle timeout as a [`Duration`].
    #[must_use]
    pub const fn idle_timeout(&self) -> Duration { Duration::from_millis(self.idle_timeout_ms) }
}

#[derive(Debug)]
struct ConfigInner {
    idle_timeout_ms: AtomicU64,
    max_text_message_size: AtomicUsize,
    max_binary_message_size: AtomicUsize,
    demanding: AtomicBool,
}

/// Live configuration shared by one session's components.
///
/// Cloning yields another handle to the same values.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use wiresocket::config::{SessionConfig, WebSocketDefaults};
///
/// let config = SessionConfig::new(&WebSocketDefaults::default());
/// let shared = config.clone();
/// shared.set_idle_timeout(Duration::from_secs(7200));
/// assert_eq!(config.idle_timeout(), Duration::from_secs(7200));
/// ```
#[derive(Clone, Debug)]
pub struct SessionConfig {
    inner: Arc<ConfigInner>,
}

impl Default for SessionConfig {
    fn default() -> Self { Self::new(&WebSocketDefaults::default()) }
}

impl SessionConfig {
    /// Create a configuration seeded from `defaults`.
    #[must_use]
    pub fn new(defaults: &WebSocketDefaults) -> Self {
        Self {
            inner: Arc::new(ConfigInner {
                idle_timeout_ms: AtomicU64::new(defaults.idle_timeout_ms),
                max_text_message_size: AtomicUsize::new(defaults.max_text_message_size),
                max_binary_message_size: AtomicUsize::new(defaults.max_binary_message_size),
                demanding: AtomicBool::new(false),
            }),
        }
    }

    /// Current idle timeout; [`Duration::ZERO`] means expiry is disabled.
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.inner.idle_timeout_ms.load(Ordering::Acquire))
    }

    /// Replace the idle timeout. Visible to the next idle check.
    pub fn set_idle_timeout(&self, timeout: Duration) {
        self.inner
            .idle_timeout_ms
            .store(duration_to_millis(timeout), Ordering::Release);
    }

    /// Maximum text message size, or `None` when unlimited.
    #[must_use]
    pub fn max_text_message_size(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.inner.max_text_message_size.load(Ordering::Acquire))
    }

    /// Set the maximum text message size; `0` removes the limit.
    pub fn set_max_text_message_size(&self, bytes: usize) {
        self.inner
            .max_text_message_size
            .store(bytes, Ordering::Release);
    }

    /// Maximum binary message size, or `None` when unlimited.
    #[must_use]
    pub fn max_binary_message_size(&self) -> Option<NonZeroUsize> {
        NonZeroUsize::new(self.inner.max_binary_message_size.load(Ordering::Acquire))
    }

    /// Set the maximum binary message size; `0` removes the limit.
    pub fn set_max_binary_message_size(&self, bytes: usize) {
        self.inner
            .max_binary_message_size
            .store(bytes, Ordering::Release);
    }

    /// Whether the application manages inbound demand.
    #[must_use]
    pub fn is_demanding(&self) -> bool { self.inner.demanding.load(Ordering::Acquire) }

    /// Hand demand management to the application, or take it back.
    /// Applies from the next frame processed.
    pub fn set_demanding(&self, demanding: bool) {
        self.inner.demanding.store(demanding, Ordering::Release);
    }

    /// Size limit applying to messages of `kind`.
    #[must_use]
    pub fn max_message_size(&self, kind: MessageKind) -> Option<NonZeroUsize> {
        match kind {
            MessageKind::Text => self.max_text_message_size(),
            MessageKind::Binary => self.max_binary_message_size(),
        }
    }

    /// Overwrite every value with `defaults`.
    pub fn apply_defaults(&self, defaults: &WebSocketDefaults) {
        self.set_idle_timeout(defaults.idle_timeout());
        self.set_max_text_message_size(defaults.max_text_message_size);
        self.set_max_binary_message_size(defaults.max_binary_message_size);
    }

    /// Copy of the current values.
    #[must_use]
    pub fn snapshot(&self) -> WebSocketDefaults {
        WebSocketDefaults {
            idle_timeout_ms: self.inner.idle_timeout_ms.load(Ordering::Acquire),
            max_text_message_size: self.inner.max_text_message_size.load(Ordering::Acquire),
            max_binary_message_size: self.inner.max_binary_message_size.load(Ordering::Acquire),
        }
    }

    /// Whether `other` is a handle to the same live values.
    #[must_use]
    pub fn shares_state_with(&self, other: &Self) -> bool { Arc::ptr_eq(&self.inner, &other.inner) }
}

/// Partial configuration update; `None` fields leave the target untouched.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Replacement idle timeout.
    pub idle_timeout: Option<Duration>,
    /// Replacement text message size limit.
    pub max_text_message_size: Option<usize>,
    /// Replacement binary message size limit.
    pub max_binary_message_size: Option<usize>,
    /// Replacement demanding flag.
    pub demanding: Option<bool>,
}

impl ConfigOverrides {
    /// Override the idle timeout.
    #[must_use]
    pub const fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Override the text message size limit.
    #[must_use]
    pub const fn max_text_message_size(mut self, bytes: usize) -> Self {
        self.max_text_message_size = Some(bytes);
        self
    }

    /// Override the binary message size limit.
    #[must_use]
    pub const fn max_binary_message_size(mut self, bytes: usize) -> Self {
        self.max_binary_message_size = Some(bytes);
        self
    }

    /// Override demand management.
    #[must_use]
    pub const fn demanding(mut self, demanding: bool) -> Self {
        self.demanding = Some(demanding);
        self
    }

    /// Returns `true` when no field is overridden.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.idle_timeout.is_none()
            && self.max_text_message_size.is_none()
            && self.max_binary_message_size.is_none()
            && self.demanding.is_none()
    }

    /// Write the overridden fields into `config`.
    pub fn apply_to(&self, config: &SessionConfig) {
        if let Some(timeout) = self.idle_timeout {
            config.set_idle_timeout(timeout);
        }
        if let Some(bytes) = self.max_text_message_size {
            config.set_max_text_message_size(bytes);
        }
        if let Some(bytes) = self.max_binary_message_size {
            config.set_max_binary_message_size(bytes);
        }
        if let Some(demanding) = self.demanding {
            config.set_demanding(demanding);
        }
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rstest::rstest;

    use super::{ConfigOverrides, SessionConfig, WebSocketDefaults};
    use crate::message_assembler::MessageKind;

    #[test]
    fn defaults_deserialize_with_missing_fields() {
        let defaults: WebSocketDefaults =
            serde_json::from_str(r#"{"idle_timeout_ms": 88088}"#).expect("valid defaults");
        assert_eq!(defaults.idle_timeout_ms, 88_088);
        assert_eq!(
            defaults.max_text_message_size,
            WebSocketDefaults::default().max_text_message_size
        );
    }

    #[test]
    fn zero_size_means_unlimited() {
        let config = SessionConfig::new(&WebSocketDefaults::default().with_max_message_size(0));
        assert_eq!(config.max_message_size(MessageKind::Text), None);
        assert_eq!(config.max_message_size(MessageKind::Binary), None);
    }

    #[rstest]
    #[case(MessageKind::Text)]
    #[case(MessageKind::Binary)]
    fn size_limits_are_tracked_per_kind(#[case] kind: MessageKind) {
        let config = SessionConfig::default();
        match kind {
            MessageKind::Text => config.set_max_text_message_size(4),
            MessageKind::Binary => config.set_max_binary_message_size(4),
        }
        assert_eq!(config.max_message_size(kind).map(std::num::NonZeroUsize::get), Some(4));
    }

    #[test]
    fn overrides_touch_only_set_fields() {
        let config = SessionConfig::new(&WebSocketDefaults::default().with_max_message_size(10));
        ConfigOverrides::default()
            .idle_timeout(Duration::from_secs(7200))
            .apply_to(&config);
        let snapshot = config.snapshot();
        assert_eq!(snapshot.idle_timeout_ms, 7_200_000);
        assert_eq!(snapshot.max_text_message_size, 10);
        assert_eq!(snapshot.max_binary_message_size, 10);
    }

    #[test]
    fn clones_share_live_values() {
        let config = SessionConfig::default();
        let other = config.clone();
        other.set_max_binary_message_size(3);
        assert!(config.shares_state_with(&other));
        assert_eq!(config.snapshot().max_binary_message_size, 3);
    }

    #[test]
    fn demanding_is_live_and_overridable() {
        let config = SessionConfig::default();
        assert!(!config.is_demanding());
        ConfigOverrides::default().demanding(true).apply_to(&config);
        assert!(config.clone().is_demanding());
        config.set_demanding(false);
        assert!(!config.is_demanding());
    }

    #[test]
    fn empty_overrides_report_empty() {
        assert!(ConfigOverrides::default().is_empty());
        assert!(!ConfigOverrides::default().max_text_message_size(1).is_empty());
    }
}
