//! Recording session ownership
//!
//! `SessionController` runs on the primary async context and is the only
//! writer of the session. Everything else talks to it through messages.

pub mod controller;
pub mod model;

#[cfg(test)]
pub mod testing;

pub use controller::{ControllerHandle, SessionController};
pub use model::{RecordingFlag, SessionSnapshot};
