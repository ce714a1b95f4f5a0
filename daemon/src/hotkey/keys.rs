//! Modifier key definitions and key code constants
//!
//! Provides a platform-neutral modifier bitset whose bit values mirror
//! macOS CGEventFlags, plus the virtual key codes the trigger layer needs
//! to recognise modifier keys arriving as flag-change events.

use std::fmt;
use std::ops::{BitAnd, BitOr};

use serde::{Deserialize, Serialize};

/// Modifier flag bitset (bit values match CGEventFlags)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModifierMask(u64);

impl ModifierMask {
    pub const NONE: Self = Self(0);
    /// Shift key modifier flag
    pub const SHIFT: Self = Self(0x0002_0000);
    /// Control key modifier flag
    pub const CONTROL: Self = Self(0x0004_0000);
    /// Option/Alt key modifier flag
    pub const OPTION: Self = Self(0x0008_0000);
    /// Command key modifier flag
    pub const COMMAND: Self = Self(0x0010_0000);
    /// Fn key modifier flag, also raised by the OS for function and arrow keys
    pub const FN: Self = Self(0x0080_0000);

    /// Modifiers that must match a configured chord exactly
    const STRICT: Self = Self(Self::SHIFT.0 | Self::CONTROL.0 | Self::OPTION.0 | Self::COMMAND.0);
    const ALL: Self = Self(Self::STRICT.0 | Self::FN.0);

    /// Build a mask from raw event flags, dropping non-modifier bits
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits & Self::ALL.0)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Check whether these event flags satisfy a configured chord.
    ///
    /// Shift/Control/Option/Command must match exactly; Fn is only
    /// required when the chord names it.
    pub fn matches_chord(self, required: Self) -> bool {
        self.contains(required) && self & Self::STRICT == required & Self::STRICT
    }
}

impl BitOr for ModifierMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for ModifierMask {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl fmt::Display for ModifierMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::CONTROL, "Ctrl"),
            (Self::OPTION, "Opt"),
            (Self::SHIFT, "Shift"),
            (Self::COMMAND, "Cmd"),
            (Self::FN, "Fn"),
        ];
        let parts: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if parts.is_empty() {
            write!(f, "none")
        } else {
            write!(f, "{}", parts.join("+"))
        }
    }
}

/// macOS virtual key codes used by the trigger defaults and modifier mapping
pub mod codes {
    pub const RIGHT_COMMAND: u16 = 0x36;
    pub const LEFT_COMMAND: u16 = 0x37;
    pub const LEFT_SHIFT: u16 = 0x38;
    pub const LEFT_OPTION: u16 = 0x3A;
    pub const LEFT_CONTROL: u16 = 0x3B;
    pub const RIGHT_SHIFT: u16 = 0x3C;
    pub const RIGHT_OPTION: u16 = 0x3D;
    pub const RIGHT_CONTROL: u16 = 0x3E;
    pub const FUNCTION: u16 = 0x3F;
    pub const SPACE: u16 = 0x31;
    pub const F13: u16 = 0x69;
}

/// Lowest button number delivered as an "other mouse" event (middle button)
pub const FIRST_AUXILIARY_BUTTON: u16 = 2;

/// Flag raised while the given key is held, if the key is a modifier key
pub fn modifier_for_key(key_code: u16) -> Option<ModifierMask> {
    match key_code {
        codes::LEFT_COMMAND | codes::RIGHT_COMMAND => Some(ModifierMask::COMMAND),
        codes::LEFT_SHIFT | codes::RIGHT_SHIFT => Some(ModifierMask::SHIFT),
        codes::LEFT_OPTION | codes::RIGHT_OPTION => Some(ModifierMask::OPTION),
        codes::LEFT_CONTROL | codes::RIGHT_CONTROL => Some(ModifierMask::CONTROL),
        codes::FUNCTION => Some(ModifierMask::FN),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_bits_drops_unrelated_flags() {
        // 0x100 is a device-dependent bit that must not leak into the mask
        let mask = ModifierMask::from_bits(0x0004_0100);
        assert_eq!(mask, ModifierMask::CONTROL);
    }

    #[test]
    fn test_chord_exact_match() {
        let chord = ModifierMask::CONTROL | ModifierMask::OPTION;
        assert!(chord.matches_chord(chord));
        assert!(!(chord | ModifierMask::SHIFT).matches_chord(chord));
        assert!(!ModifierMask::CONTROL.matches_chord(chord));
    }

    #[test]
    fn test_chord_ignores_implicit_fn() {
        let flags = ModifierMask::COMMAND | ModifierMask::FN;
        assert!(flags.matches_chord(ModifierMask::COMMAND));
        assert!(!ModifierMask::COMMAND.matches_chord(ModifierMask::COMMAND | ModifierMask::FN));
    }

    #[test]
    fn test_modifier_for_key() {
        assert_eq!(modifier_for_key(codes::RIGHT_OPTION), Some(ModifierMask::OPTION));
        assert_eq!(modifier_for_key(codes::FUNCTION), Some(ModifierMask::FN));
        assert_eq!(modifier_for_key(codes::SPACE), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(ModifierMask::NONE.to_string(), "none");
        assert_eq!(
            (ModifierMask::COMMAND | ModifierMask::CONTROL).to_string(),
            "Ctrl+Cmd"
        );
    }
}
