//! Trigger detection for the record and auxiliary hotkeys
//!
//! Everything here except the store's write path runs on the event tap
//! thread: configuration snapshots, per-role gesture state and the
//! classification that decides whether an event is swallowed.

pub mod config;
pub mod double_tap;
pub mod hold;
pub mod matcher;
pub mod router;

pub use config::{
    ConfigError, TriggerConfiguration, TriggerMode, TriggerRole, TriggerSnapshot, TriggerStore,
};
pub use matcher::{Gestures, TriggerMatcher};
pub use router::EventRouter;
