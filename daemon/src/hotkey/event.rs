//! Platform-neutral input events delivered by the event tap

use tokio::time::Instant;

use super::keys::ModifierMask;

/// Kind of raw input event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    KeyDown,
    KeyUp,
    /// Modifier flags changed (a modifier key went down or up)
    FlagsChanged,
    /// Auxiliary (non left/right) mouse button pressed
    AuxButtonDown,
    /// Auxiliary mouse button released
    AuxButtonUp,
}

/// One input event as seen by the trigger matcher
#[derive(Debug, Clone, Copy)]
pub struct InputEvent {
    pub kind: EventKind,
    /// Virtual key code (zero for button events)
    pub key_code: u16,
    /// Modifier flags active when the event was generated
    pub modifiers: ModifierMask,
    /// True for key-down events generated by key auto-repeat
    pub auto_repeat: bool,
    /// Mouse button number for button events
    pub button: Option<u16>,
    /// Monotonic time of arrival
    pub timestamp: Instant,
}

impl InputEvent {
    pub fn key_down(key_code: u16, modifiers: ModifierMask, timestamp: Instant) -> Self {
        Self {
            kind: EventKind::KeyDown,
            key_code,
            modifiers,
            auto_repeat: false,
            button: None,
            timestamp,
        }
    }

    pub fn key_up(key_code: u16, modifiers: ModifierMask, timestamp: Instant) -> Self {
        Self {
            kind: EventKind::KeyUp,
            ..Self::key_down(key_code, modifiers, timestamp)
        }
    }

    pub fn flags_changed(key_code: u16, modifiers: ModifierMask, timestamp: Instant) -> Self {
        Self {
            kind: EventKind::FlagsChanged,
            ..Self::key_down(key_code, modifiers, timestamp)
        }
    }

    pub fn button_down(button: u16, timestamp: Instant) -> Self {
        Self {
            kind: EventKind::AuxButtonDown,
            key_code: 0,
            modifiers: ModifierMask::NONE,
            auto_repeat: false,
            button: Some(button),
            timestamp,
        }
    }

    pub fn button_up(button: u16, timestamp: Instant) -> Self {
        Self {
            kind: EventKind::AuxButtonUp,
            ..Self::button_down(button, timestamp)
        }
    }

    pub fn repeated(mut self) -> Self {
        self.auto_repeat = true;
        self
    }

    pub fn is_button(&self) -> bool {
        matches!(self.kind, EventKind::AuxButtonDown | EventKind::AuxButtonUp)
    }
}
