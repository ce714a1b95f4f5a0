//! Trigger configuration and the snapshot store shared with the listener thread
//!
//! The store is written only from the session controller task and read from
//! the event tap thread. Readers clone an `Arc` to an immutable snapshot, so a
//! read never observes a half-applied mutation.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::hotkey::keys::{codes, modifier_for_key, ModifierMask, FIRST_AUXILIARY_BUTTON};

/// Gesture family a trigger responds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Active only while the key (or chord) is held
    HoldKey,
    /// Two quick taps of a modifier key toggle recording
    DoubleTapToggle,
    /// Holding an auxiliary mouse button past a threshold
    MouseHold,
}

impl TriggerMode {
    /// Modes whose session lasts exactly as long as a physical hold
    pub fn is_hold_based(self) -> bool {
        matches!(self, TriggerMode::HoldKey | TriggerMode::MouseHold)
    }
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerMode::HoldKey => write!(f, "hold_key"),
            TriggerMode::DoubleTapToggle => write!(f, "double_tap_toggle"),
            TriggerMode::MouseHold => write!(f, "mouse_hold"),
        }
    }
}

/// Which of the two independent triggers a configuration belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerRole {
    /// Starts and stops recording sessions
    Record,
    /// Secondary trigger that changes the active option
    Auxiliary,
}

impl TriggerRole {
    pub fn other(self) -> Self {
        match self {
            TriggerRole::Record => TriggerRole::Auxiliary,
            TriggerRole::Auxiliary => TriggerRole::Record,
        }
    }
}

impl fmt::Display for TriggerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerRole::Record => write!(f, "record"),
            TriggerRole::Auxiliary => write!(f, "auxiliary"),
        }
    }
}

/// One trigger definition.
///
/// For `MouseHold` the `key_code` holds the mouse button number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerConfiguration {
    pub mode: TriggerMode,
    pub key_code: u16,
    #[serde(default)]
    pub modifiers: ModifierMask,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl TriggerConfiguration {
    pub fn default_record() -> Self {
        Self {
            mode: TriggerMode::HoldKey,
            key_code: codes::RIGHT_OPTION,
            modifiers: ModifierMask::NONE,
            enabled: true,
        }
    }

    pub fn default_auxiliary() -> Self {
        Self {
            mode: TriggerMode::HoldKey,
            key_code: codes::F13,
            modifiers: ModifierMask::NONE,
            enabled: false,
        }
    }

    /// Reject definitions the matcher could never recognise
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.mode {
            TriggerMode::DoubleTapToggle if modifier_for_key(self.key_code).is_none() => {
                Err(ConfigError::NotAModifierKey(self.key_code))
            }
            TriggerMode::MouseHold if self.key_code < FIRST_AUXILIARY_BUTTON => {
                Err(ConfigError::NotAnAuxiliaryButton(self.key_code))
            }
            _ => Ok(()),
        }
    }

    /// Two enabled triggers bound to the same gesture are ambiguous
    pub fn collides_with(&self, other: &TriggerConfiguration) -> bool {
        self.enabled
            && other.enabled
            && self.mode == other.mode
            && self.key_code == other.key_code
            && self.modifiers == other.modifiers
    }
}

/// Errors raised when a configuration mutation is refused
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("key code {0:#04x} is not a modifier key; double-tap needs a modifier")]
    NotAModifierKey(u16),

    #[error("button {0} is not an auxiliary mouse button")]
    NotAnAuxiliaryButton(u16),

    #[error("{role} trigger would collide with the {other} trigger")]
    Collision { role: TriggerRole, other: TriggerRole },

    #[error("session controller is not running")]
    ControllerClosed,
}

impl ConfigError {
    /// Stable identifier sent to IPC clients
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::NotAModifierKey(_) => "not_a_modifier_key",
            ConfigError::NotAnAuxiliaryButton(_) => "not_an_auxiliary_button",
            ConfigError::Collision { .. } => "trigger_collision",
            ConfigError::ControllerClosed => "controller_closed",
        }
    }
}

/// A trigger as published to the listener thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedTrigger {
    #[serde(flatten)]
    pub config: TriggerConfiguration,
    /// Set when both triggers were loaded colliding; the trigger stays inert
    /// until one of them is reconfigured
    pub inert: bool,
}

impl PublishedTrigger {
    /// Whether the matcher should look at events for this trigger at all
    pub fn is_live(&self) -> bool {
        self.config.enabled && !self.inert
    }
}

/// Immutable view of both triggers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSnapshot {
    pub revision: u64,
    pub record: PublishedTrigger,
    pub auxiliary: PublishedTrigger,
}

impl TriggerSnapshot {
    fn build(revision: u64, record: TriggerConfiguration, auxiliary: TriggerConfiguration) -> Self {
        let inert = record.collides_with(&auxiliary);
        Self {
            revision,
            record: PublishedTrigger { config: record, inert },
            auxiliary: PublishedTrigger { config: auxiliary, inert },
        }
    }

    pub fn get(&self, role: TriggerRole) -> &PublishedTrigger {
        match role {
            TriggerRole::Record => &self.record,
            TriggerRole::Auxiliary => &self.auxiliary,
        }
    }
}

/// Concurrently readable trigger configuration
#[derive(Debug)]
pub struct TriggerStore {
    current: RwLock<Arc<TriggerSnapshot>>,
}

impl TriggerStore {
    /// Create the store from persisted settings.
    ///
    /// Invalid definitions fall back to the role default; colliding
    /// definitions are kept but published inert.
    pub fn new(record: TriggerConfiguration, auxiliary: TriggerConfiguration) -> Self {
        let record = Self::validated_or_default(TriggerRole::Record, record);
        let auxiliary = Self::validated_or_default(TriggerRole::Auxiliary, auxiliary);
        let snapshot = TriggerSnapshot::build(1, record, auxiliary);
        if snapshot.record.inert {
            warn!(
                mode = %record.mode,
                key_code = record.key_code,
                "record and auxiliary triggers collide, both inert until reconfigured"
            );
        }
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    fn validated_or_default(role: TriggerRole, config: TriggerConfiguration) -> TriggerConfiguration {
        match config.validate() {
            Ok(()) => config,
            Err(e) => {
                warn!(%role, error = %e, "invalid persisted trigger, using default");
                match role {
                    TriggerRole::Record => TriggerConfiguration::default_record(),
                    TriggerRole::Auxiliary => TriggerConfiguration::default_auxiliary(),
                }
            }
        }
    }

    /// Current snapshot; cheap and safe to call from the listener thread
    pub fn snapshot(&self) -> Arc<TriggerSnapshot> {
        Arc::clone(&self.current.read())
    }

    /// Replace one trigger, refusing invalid or colliding definitions.
    ///
    /// Returns the previous definition when something changed, `None` when
    /// the new definition equals the current one.
    pub fn update(
        &self,
        role: TriggerRole,
        config: TriggerConfiguration,
    ) -> Result<Option<TriggerConfiguration>, ConfigError> {
        config.validate()?;

        let mut current = self.current.write();
        let previous = current.get(role).config;
        if previous == config && !current.get(role).inert {
            return Ok(None);
        }

        let other = current.get(role.other()).config;
        if config.collides_with(&other) {
            return Err(ConfigError::Collision {
                role,
                other: role.other(),
            });
        }

        let (record, auxiliary) = match role {
            TriggerRole::Record => (config, other),
            TriggerRole::Auxiliary => (other, config),
        };
        let next = TriggerSnapshot::build(current.revision + 1, record, auxiliary);
        info!(
            %role,
            mode = %config.mode,
            key_code = config.key_code,
            modifiers = %config.modifiers,
            enabled = config.enabled,
            revision = next.revision,
            "trigger configuration published"
        );
        *current = Arc::new(next);

        Ok(Some(previous))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn double_tap(key_code: u16) -> TriggerConfiguration {
        TriggerConfiguration {
            mode: TriggerMode::DoubleTapToggle,
            key_code,
            modifiers: ModifierMask::NONE,
            enabled: true,
        }
    }

    #[test]
    fn test_validate_double_tap_requires_modifier() {
        assert_ok!(double_tap(codes::RIGHT_COMMAND).validate());
        assert_eq!(
            double_tap(codes::SPACE).validate(),
            Err(ConfigError::NotAModifierKey(codes::SPACE))
        );
    }

    #[test]
    fn test_validate_mouse_hold_requires_auxiliary_button() {
        let mut config = TriggerConfiguration {
            mode: TriggerMode::MouseHold,
            key_code: 1,
            modifiers: ModifierMask::NONE,
            enabled: true,
        };
        assert_err!(config.validate());
        config.key_code = 3;
        assert_ok!(config.validate());
    }

    #[test]
    fn test_update_publishes_new_revision() {
        let store = TriggerStore::new(
            TriggerConfiguration::default_record(),
            TriggerConfiguration::default_auxiliary(),
        );
        let before = store.snapshot();

        let previous = store
            .update(TriggerRole::Record, double_tap(codes::RIGHT_COMMAND))
            .unwrap();

        assert_eq!(previous, Some(TriggerConfiguration::default_record()));
        let after = store.snapshot();
        assert_eq!(after.revision, before.revision + 1);
        assert_eq!(after.record.config.mode, TriggerMode::DoubleTapToggle);
        // Old readers keep their consistent view
        assert_eq!(before.record.config.mode, TriggerMode::HoldKey);
    }

    #[test]
    fn test_update_unchanged_is_noop() {
        let store = TriggerStore::new(
            TriggerConfiguration::default_record(),
            TriggerConfiguration::default_auxiliary(),
        );
        let result = store.update(TriggerRole::Record, TriggerConfiguration::default_record());
        assert_eq!(result, Ok(None));
        assert_eq!(store.snapshot().revision, 1);
    }

    #[test]
    fn test_update_refuses_collision_and_keeps_previous() {
        let store = TriggerStore::new(
            TriggerConfiguration::default_record(),
            TriggerConfiguration::default_auxiliary(),
        );
        let clash = TriggerConfiguration {
            enabled: true,
            ..TriggerConfiguration::default_record()
        };

        let result = store.update(TriggerRole::Auxiliary, clash);

        assert_eq!(
            result,
            Err(ConfigError::Collision {
                role: TriggerRole::Auxiliary,
                other: TriggerRole::Record,
            })
        );
        assert!(!store.snapshot().auxiliary.config.enabled);
    }

    #[test]
    fn test_loaded_collision_is_inert_until_reconfigured() {
        let record = TriggerConfiguration::default_record();
        let store = TriggerStore::new(record, record);
        let snapshot = store.snapshot();
        assert!(snapshot.record.inert && snapshot.auxiliary.inert);
        assert!(!snapshot.record.is_live());

        let moved = TriggerConfiguration {
            key_code: codes::F13,
            ..record
        };
        assert_ok!(store.update(TriggerRole::Auxiliary, moved));

        let snapshot = store.snapshot();
        assert!(snapshot.record.is_live());
        assert!(snapshot.auxiliary.is_live());
    }

    #[test]
    fn test_invalid_persisted_trigger_falls_back() {
        let store = TriggerStore::new(
            double_tap(codes::SPACE),
            TriggerConfiguration::default_auxiliary(),
        );
        assert_eq!(
            store.snapshot().record.config,
            TriggerConfiguration::default_record()
        );
    }

    #[test]
    fn test_configuration_deserialization_defaults() {
        let json = r#"{"mode":"mouse_hold","key_code":3}"#;
        let config: TriggerConfiguration = serde_json::from_str(json).unwrap();
        assert_eq!(config.mode, TriggerMode::MouseHold);
        assert!(config.enabled);
        assert!(config.modifiers.is_empty());
    }
}
