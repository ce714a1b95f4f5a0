//! Hotkey module for global input event listening
//!
//! Uses a macOS CGEventTap to observe key, modifier and auxiliary mouse
//! button events and to swallow the ones that belong to a trigger.

pub mod event;
pub mod keys;
mod listener;

pub use listener::HotkeyListener;
