//! Test utilities for driving `wiresocket` upgrades and connections.
//!
//! ```rust
//! use wiresocket_testing::{Recorder, upgrade_request};
//!
//! let request = upgrade_request("/chat");
//! assert!(request.is_websocket_upgrade());
//! let recorder = Recorder::default();
//! let _hooks = recorder.hooks();
//! assert!(recorder.events().is_empty());
//! ```

pub mod helpers;
pub mod logging;
pub mod metrics;

pub use helpers::{Recorder, SAMPLE_KEY, drain_outbound, drive_frames, upgrade_request};
pub use logging::{LoggerHandle, logger};
pub use metrics::{counter_total, debugging_recorder_setup};
