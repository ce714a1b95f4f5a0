//! Long-press detection for the mouse-hold trigger
//!
//! A press opens a gesture with a fresh generation number. The controller
//! confirms the gesture once the hold threshold elapses; a release that gets
//! here first tears the gesture down, which makes the pending confirmation
//! for that generation a no-op.

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::collab::FocusHandle;

/// State of one physical press of the trigger button
#[derive(Debug, Clone)]
pub struct HoldGestureState {
    pub generation: u64,
    pub pressed_at: Instant,
    pub button_down: bool,
    pub hold_confirmed: bool,
    /// Frontmost application when the button went down
    pub focus: Option<FocusHandle>,
}

/// Outcome of releasing the trigger button
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldRelease {
    /// The hold had been confirmed, a session is running
    Confirmed,
    /// Short click, the pending confirmation is cancelled
    Click,
    /// No gesture in progress (e.g. cleared by reconfiguration)
    Untracked,
}

#[derive(Debug, Default)]
struct Inner {
    gesture: Option<HoldGestureState>,
    next_generation: u64,
}

/// Press/confirm/release tracking for one trigger role
#[derive(Debug, Default)]
pub struct HoldDetector {
    inner: Mutex<Inner>,
}

impl HoldDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a gesture and return its generation.
    ///
    /// A press while a gesture is already open (missed release) replaces it.
    pub fn press(&self, now: Instant) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        inner.gesture = Some(HoldGestureState {
            generation,
            pressed_at: now,
            button_down: true,
            hold_confirmed: false,
            focus: None,
        });
        generation
    }

    /// Record the focus snapshot for a gesture that is still open
    pub fn attach_focus(&self, generation: u64, focus: Option<FocusHandle>) {
        let mut inner = self.inner.lock();
        if let Some(gesture) = inner.gesture.as_mut() {
            if gesture.generation == generation {
                gesture.focus = focus;
            }
        }
    }

    /// Confirm the hold for `generation`.
    ///
    /// Succeeds only while that gesture is open, the button is still down
    /// and it has not been confirmed already. Returns the focus snapshot.
    pub fn confirm(&self, generation: u64) -> Option<Option<FocusHandle>> {
        let mut inner = self.inner.lock();
        let gesture = inner.gesture.as_mut()?;
        if gesture.generation != generation || !gesture.button_down || gesture.hold_confirmed {
            return None;
        }
        gesture.hold_confirmed = true;
        Some(gesture.focus.clone())
    }

    /// Close the current gesture
    pub fn release(&self) -> HoldRelease {
        let mut inner = self.inner.lock();
        match inner.gesture.take() {
            Some(gesture) if gesture.hold_confirmed => HoldRelease::Confirmed,
            Some(_) => HoldRelease::Click,
            None => HoldRelease::Untracked,
        }
    }

    pub fn reset(&self) {
        self.inner.lock().gesture = None;
    }

    pub fn current(&self) -> Option<HoldGestureState> {
        self.inner.lock().gesture.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_click_never_confirms() {
        let detector = HoldDetector::new();
        let generation = detector.press(Instant::now());

        assert_eq!(detector.release(), HoldRelease::Click);
        assert_eq!(detector.confirm(generation), None);
    }

    #[test]
    fn test_hold_confirms_then_release() {
        let detector = HoldDetector::new();
        let generation = detector.press(Instant::now());
        detector.attach_focus(generation, Some(FocusHandle::new("com.apple.TextEdit")));

        let focus = detector.confirm(generation).expect("hold should confirm");
        assert_eq!(focus, Some(FocusHandle::new("com.apple.TextEdit")));
        assert!(detector.current().unwrap().hold_confirmed);
        assert_eq!(detector.release(), HoldRelease::Confirmed);
    }

    #[test]
    fn test_confirm_is_single_shot() {
        let detector = HoldDetector::new();
        let generation = detector.press(Instant::now());
        assert!(detector.confirm(generation).is_some());
        assert!(detector.confirm(generation).is_none());
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let detector = HoldDetector::new();
        let first = detector.press(Instant::now());
        detector.release();
        let second = detector.press(Instant::now());

        assert_eq!(detector.confirm(first), None);
        assert!(detector.confirm(second).is_some());
    }

    #[test]
    fn test_reset_drops_gesture() {
        let detector = HoldDetector::new();
        let generation = detector.press(Instant::now());
        detector.reset();

        assert!(detector.current().is_none());
        assert_eq!(detector.confirm(generation), None);
        assert_eq!(detector.release(), HoldRelease::Untracked);
    }
}
