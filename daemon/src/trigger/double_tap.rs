//! Time-windowed double-tap detection

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Detects two taps within a fixed window.
///
/// Shared between the listener thread (taps) and the controller task
/// (resets on reconfiguration); the lock is only held for the compare
/// and update of a single timestamp.
#[derive(Debug)]
pub struct DoubleTapDetector {
    window: Duration,
    last_tap: Mutex<Option<Instant>>,
}

impl DoubleTapDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_tap: Mutex::new(None),
        }
    }

    /// Register a tap at `now`.
    ///
    /// Returns true when it completes a double-tap. The stored timestamp is
    /// left in place in that case; the caller decides when to `reset`.
    pub fn register_tap(&self, now: Instant) -> bool {
        let mut last_tap = self.last_tap.lock();
        match *last_tap {
            Some(previous) if now.saturating_duration_since(previous) <= self.window => true,
            _ => {
                *last_tap = Some(now);
                false
            }
        }
    }

    pub fn reset(&self) {
        *self.last_tap.lock() = None;
    }

    pub fn is_armed(&self) -> bool {
        self.last_tap.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(400);

    #[test]
    fn test_two_taps_inside_window() {
        let detector = DoubleTapDetector::new(WINDOW);
        let t0 = Instant::now();

        assert!(!detector.register_tap(t0));
        assert!(detector.register_tap(t0 + Duration::from_millis(390)));
        // Caller has not reset yet, the baseline is still armed
        assert!(detector.is_armed());
    }

    #[test]
    fn test_window_boundary_is_inclusive() {
        let detector = DoubleTapDetector::new(WINDOW);
        let t0 = Instant::now();
        detector.register_tap(t0);
        assert!(detector.register_tap(t0 + WINDOW));
    }

    #[test]
    fn test_late_tap_becomes_new_baseline() {
        let detector = DoubleTapDetector::new(WINDOW);
        let t0 = Instant::now();

        assert!(!detector.register_tap(t0));
        let late = t0 + Duration::from_millis(410);
        assert!(!detector.register_tap(late));
        assert!(detector.register_tap(late + Duration::from_millis(200)));
    }

    #[test]
    fn test_reset_clears_baseline() {
        let detector = DoubleTapDetector::new(WINDOW);
        let t0 = Instant::now();
        detector.register_tap(t0);
        detector.reset();

        assert!(!detector.is_armed());
        assert!(!detector.register_tap(t0 + Duration::from_millis(100)));
    }
}
