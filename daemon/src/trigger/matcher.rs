//! Trigger classification for raw input events
//!
//! Runs on the event tap thread. Classification is branch-only: the only
//! shared state touched is the per-role gesture state, behind short
//! non-blocking critical sections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::hotkey::event::{EventKind, InputEvent};
use crate::hotkey::keys::{modifier_for_key, ModifierMask};

use super::config::{TriggerConfiguration, TriggerMode, TriggerRole};
use super::double_tap::DoubleTapDetector;
use super::hold::{HoldDetector, HoldRelease};

/// What a single event means for the trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Not related to this trigger, pass through
    NoMatch,
    /// Starts (or toggles on) the trigger, swallow the event
    ConsumeAndStart,
    /// Ends (or toggles off) the trigger, swallow the event
    ConsumeAndStop,
    /// Ends the trigger but the event must still reach other applications
    PassThroughAndStop,
    /// Part of a gesture in progress, no transition, pass through
    Ignore,
}

impl Classification {
    /// Whether the event tap must swallow the event
    pub fn consumes(self) -> bool {
        matches!(self, Classification::ConsumeAndStart | Classification::ConsumeAndStop)
    }

    pub fn starts(self) -> bool {
        self == Classification::ConsumeAndStart
    }

    pub fn stops(self) -> bool {
        matches!(
            self,
            Classification::ConsumeAndStop | Classification::PassThroughAndStop
        )
    }
}

/// Result of classifying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub classification: Classification,
    /// Generation of a mouse hold that now awaits confirmation
    pub hold_armed: Option<u64>,
    /// Swallow the event even though it causes no transition
    pub swallow: bool,
}

impl Verdict {
    /// Whether the event tap must swallow the event
    pub fn consumes(&self) -> bool {
        self.swallow || self.classification.consumes()
    }
}

impl From<Classification> for Verdict {
    fn from(classification: Classification) -> Self {
        Self {
            classification,
            hold_armed: None,
            swallow: false,
        }
    }
}

/// In-flight gesture state for one trigger role
#[derive(Debug)]
pub struct GestureState {
    /// A HoldKey press has been consumed and its release is pending
    key_engaged: AtomicBool,
    /// Physical state of the configured modifier key
    modifier_down: AtomicBool,
    pub double_tap: DoubleTapDetector,
    pub hold: HoldDetector,
}

impl GestureState {
    pub fn new(double_tap_window: Duration) -> Self {
        Self {
            key_engaged: AtomicBool::new(false),
            modifier_down: AtomicBool::new(false),
            double_tap: DoubleTapDetector::new(double_tap_window),
            hold: HoldDetector::new(),
        }
    }

    pub fn is_key_engaged(&self) -> bool {
        self.key_engaged.load(Ordering::Acquire)
    }

    /// Drop every gesture in progress
    pub fn invalidate(&self) {
        self.key_engaged.store(false, Ordering::Release);
        self.modifier_down.store(false, Ordering::Release);
        self.double_tap.reset();
        self.hold.reset();
    }

    fn engage(&self) -> bool {
        self.key_engaged
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn disengage(&self) -> bool {
        self.key_engaged.swap(false, Ordering::AcqRel)
    }

    /// Track a flag change of the configured modifier key, returning
    /// whether the key went down.
    ///
    /// Left and right variants share one flag, so a set flag alone does not
    /// mean a press: while the sibling is held, the release of this key
    /// arrives with the flag still set.
    fn modifier_edge(&self, modifiers: ModifierMask, own_flag: ModifierMask) -> bool {
        let pressed = modifiers.contains(own_flag) && !self.modifier_down.load(Ordering::Acquire);
        self.modifier_down.store(pressed, Ordering::Release);
        pressed
    }
}

/// Gesture state for both trigger roles
#[derive(Debug)]
pub struct Gestures {
    record: GestureState,
    auxiliary: GestureState,
}

impl Gestures {
    pub fn new(double_tap_window: Duration) -> Self {
        Self {
            record: GestureState::new(double_tap_window),
            auxiliary: GestureState::new(double_tap_window),
        }
    }

    pub fn get(&self, role: TriggerRole) -> &GestureState {
        match role {
            TriggerRole::Record => &self.record,
            TriggerRole::Auxiliary => &self.auxiliary,
        }
    }
}

/// Classifies events against one trigger's configuration
#[derive(Debug)]
pub struct TriggerMatcher<'a> {
    gestures: &'a GestureState,
}

impl<'a> TriggerMatcher<'a> {
    pub fn new(gestures: &'a GestureState) -> Self {
        Self { gestures }
    }

    /// Classify `event` for `trigger`.
    ///
    /// `session_active` decides the direction of a double-tap toggle.
    pub fn classify(
        &self,
        event: &InputEvent,
        trigger: &TriggerConfiguration,
        session_active: bool,
    ) -> Verdict {
        match trigger.mode {
            TriggerMode::HoldKey => self.classify_hold_key(event, trigger),
            TriggerMode::DoubleTapToggle => {
                self.classify_double_tap(event, trigger, session_active).into()
            }
            TriggerMode::MouseHold => self.classify_mouse_hold(event, trigger),
        }
    }

    fn classify_hold_key(&self, event: &InputEvent, trigger: &TriggerConfiguration) -> Verdict {
        if let Some(own_flag) = modifier_for_key(trigger.key_code) {
            return self.classify_modifier_hold(event, trigger, own_flag).into();
        }

        if event.kind == EventKind::KeyDown
            && event.key_code == trigger.key_code
            && self.gestures.is_key_engaged()
        {
            // Repeats of the held key belong to the gesture
            return Verdict {
                swallow: true,
                ..Classification::Ignore.into()
            };
        }

        self.classify_key_edge(event, trigger).into()
    }

    fn classify_key_edge(&self, event: &InputEvent, trigger: &TriggerConfiguration) -> Classification {
        match event.kind {
            EventKind::KeyDown if event.key_code == trigger.key_code => {
                if event.auto_repeat || !event.modifiers.matches_chord(trigger.modifiers) {
                    return Classification::NoMatch;
                }
                if self.gestures.engage() {
                    Classification::ConsumeAndStart
                } else {
                    Classification::Ignore
                }
            }
            EventKind::KeyUp if event.key_code == trigger.key_code => {
                if self.gestures.disengage() {
                    Classification::ConsumeAndStop
                } else {
                    Classification::NoMatch
                }
            }
            EventKind::FlagsChanged
                if !trigger.modifiers.is_empty()
                    && !event.modifiers.contains(trigger.modifiers)
                    && self.gestures.disengage() =>
            {
                // Modifier let go before the primary key
                Classification::ConsumeAndStop
            }
            _ => Classification::NoMatch,
        }
    }

    /// HoldKey where the key itself is a modifier: edges arrive as flag changes
    fn classify_modifier_hold(
        &self,
        event: &InputEvent,
        trigger: &TriggerConfiguration,
        own_flag: ModifierMask,
    ) -> Classification {
        if event.kind != EventKind::FlagsChanged {
            return Classification::NoMatch;
        }

        if event.key_code != trigger.key_code {
            if !trigger.modifiers.is_empty()
                && !event.modifiers.contains(trigger.modifiers)
                && self.gestures.disengage()
            {
                return Classification::ConsumeAndStop;
            }
            return Classification::NoMatch;
        }

        if self.gestures.modifier_edge(event.modifiers, own_flag) {
            if event.auto_repeat || !event.modifiers.without(own_flag).matches_chord(trigger.modifiers) {
                return Classification::NoMatch;
            }
            if self.gestures.engage() {
                Classification::ConsumeAndStart
            } else {
                Classification::Ignore
            }
        } else if self.gestures.disengage() {
            // Never swallow a modifier release
            Classification::PassThroughAndStop
        } else {
            Classification::NoMatch
        }
    }

    fn classify_double_tap(
        &self,
        event: &InputEvent,
        trigger: &TriggerConfiguration,
        session_active: bool,
    ) -> Classification {
        if event.is_button() {
            return Classification::NoMatch;
        }
        if event.key_code != trigger.key_code {
            // A stray key must not count towards a later double-tap
            self.gestures.double_tap.reset();
            return Classification::NoMatch;
        }
        let Some(own_flag) = modifier_for_key(trigger.key_code) else {
            return Classification::NoMatch;
        };
        if event.kind != EventKind::FlagsChanged {
            return Classification::NoMatch;
        }
        if !self.gestures.modifier_edge(event.modifiers, own_flag) || event.auto_repeat {
            return Classification::NoMatch;
        }

        if self.gestures.double_tap.register_tap(event.timestamp) {
            self.gestures.double_tap.reset();
            if session_active {
                Classification::ConsumeAndStop
            } else {
                Classification::ConsumeAndStart
            }
        } else {
            Classification::Ignore
        }
    }

    fn classify_mouse_hold(&self, event: &InputEvent, trigger: &TriggerConfiguration) -> Verdict {
        if event.button != Some(trigger.key_code) {
            return Classification::NoMatch.into();
        }
        match event.kind {
            EventKind::AuxButtonDown => Verdict {
                classification: Classification::Ignore,
                hold_armed: Some(self.gestures.hold.press(event.timestamp)),
                swallow: false,
            },
            EventKind::AuxButtonUp => match self.gestures.hold.release() {
                HoldRelease::Confirmed => Classification::ConsumeAndStop.into(),
                // Short click reaches the application untouched
                HoldRelease::Click => Classification::Ignore.into(),
                HoldRelease::Untracked => Classification::NoMatch.into(),
            },
            _ => Classification::NoMatch.into(),
        }
    }
}
