//! Global input listener using macOS CGEventTap
//!
//! Runs an active (filtering) event tap on a dedicated thread with its own
//! CFRunLoop. Every key, modifier and auxiliary mouse button event is handed
//! to the `EventRouter`; events it claims are swallowed, everything else is
//! passed through untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::trigger::EventRouter;

/// Errors that can occur in the hotkey listener
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("Accessibility permission has not been granted")]
    PermissionDenied,

    #[error("global input monitoring is only available on macOS")]
    Unsupported,
}

/// Owner of the event tap thread
pub struct HotkeyListener {
    router: Arc<EventRouter>,
    running: Arc<AtomicBool>,
    /// True once the tap is installed and enabled
    monitoring: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl HotkeyListener {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self {
            router,
            running: Arc::new(AtomicBool::new(false)),
            monitoring: Arc::new(AtomicBool::new(false)),
            thread: Mutex::new(None),
        }
    }

    /// Install the event tap.
    ///
    /// Blocks until the tap thread reports whether the tap could be created,
    /// so a missing permission surfaces here rather than in the log only.
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        match self.spawn_tap() {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                info!("hotkey listener started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    #[cfg(target_os = "macos")]
    fn spawn_tap(&self) -> Result<JoinHandle<()>, HotkeyError> {
        if !macos::is_trusted() {
            return Err(HotkeyError::PermissionDenied);
        }

        let (startup_tx, startup_rx) = std::sync::mpsc::channel();
        let router = Arc::clone(&self.router);
        let running = Arc::clone(&self.running);
        let monitoring = Arc::clone(&self.monitoring);

        let handle = std::thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");
                macos::run_event_loop(router, running, monitoring.clone(), startup_tx);
                monitoring.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        match startup_rx.recv() {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                Err(HotkeyError::EventTapCreation)
            }
        }
    }

    #[cfg(not(target_os = "macos"))]
    fn spawn_tap(&self) -> Result<JoinHandle<()>, HotkeyError> {
        let _ = &self.router;
        Err(HotkeyError::Unsupported)
    }

    /// Remove the event tap and join its thread
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            if handle.join().is_err() {
                warn!("hotkey listener thread panicked");
            }
        }
    }

    /// Whether global input monitoring is currently active
    pub fn is_monitoring(&self) -> bool {
        self.monitoring.load(Ordering::SeqCst)
    }

    /// Ask the system for input monitoring permission.
    ///
    /// Shows the system prompt when the permission is missing. If it is
    /// already granted and the tap is not running, the tap is started.
    /// Returns whether the permission is granted.
    #[cfg(target_os = "macos")]
    pub fn request_permission(&self) -> Result<bool, HotkeyError> {
        let granted = macos::prompt_for_trust();
        info!(granted, "Accessibility permission requested");
        if granted && !self.is_monitoring() {
            self.stop();
            self.start()?;
        }
        Ok(granted)
    }

    #[cfg(not(target_os = "macos"))]
    pub fn request_permission(&self) -> Result<bool, HotkeyError> {
        Err(HotkeyError::Unsupported)
    }
}

impl Drop for HotkeyListener {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::Sender;
    use std::sync::Arc;
    use std::time::Duration;

    use core_foundation::base::TCFType;
    use core_foundation::boolean::CFBoolean;
    use core_foundation::dictionary::CFDictionary;
    use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
    use core_foundation::string::{CFString, CFStringRef};
    use core_graphics::event::{
        CGEvent, CGEventTap, CGEventTapLocation, CGEventTapOptions, CGEventTapPlacement,
        CGEventType, EventField,
    };
    use tokio::time::Instant;
    use tracing::{debug, error, info, warn};

    use super::HotkeyError;
    use crate::hotkey::event::InputEvent;
    use crate::hotkey::keys::ModifierMask;
    use crate::trigger::EventRouter;

    #[link(name = "ApplicationServices", kind = "framework")]
    extern "C" {
        static kAXTrustedCheckOptionPrompt: CFStringRef;
        fn AXIsProcessTrusted() -> bool;
        fn AXIsProcessTrustedWithOptions(options: core_foundation::dictionary::CFDictionaryRef) -> bool;
    }

    pub(super) fn is_trusted() -> bool {
        unsafe { AXIsProcessTrusted() }
    }

    pub(super) fn prompt_for_trust() -> bool {
        let key = unsafe { CFString::wrap_under_get_rule(kAXTrustedCheckOptionPrompt) };
        let options = CFDictionary::from_CFType_pairs(&[(key, CFBoolean::true_value())]);
        unsafe { AXIsProcessTrustedWithOptions(options.as_concrete_TypeRef()) }
    }

    /// Convert a tapped event into the platform-neutral form
    fn to_input_event(event_type: CGEventType, event: &CGEvent) -> Option<InputEvent> {
        let now = Instant::now();
        let modifiers = ModifierMask::from_bits(event.get_flags().bits());
        let key_code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u16;
        let button = event.get_integer_value_field(EventField::MOUSE_EVENT_BUTTON_NUMBER) as u16;

        match event_type {
            CGEventType::KeyDown => {
                let input = InputEvent::key_down(key_code, modifiers, now);
                if event.get_integer_value_field(EventField::KEYBOARD_EVENT_AUTOREPEAT) != 0 {
                    Some(input.repeated())
                } else {
                    Some(input)
                }
            }
            CGEventType::KeyUp => Some(InputEvent::key_up(key_code, modifiers, now)),
            CGEventType::FlagsChanged => Some(InputEvent::flags_changed(key_code, modifiers, now)),
            CGEventType::OtherMouseDown => Some(InputEvent::button_down(button, now)),
            CGEventType::OtherMouseUp => Some(InputEvent::button_up(button, now)),
            _ => None,
        }
    }

    /// A consumed event is retyped to Null so the window server drops it
    fn swallowed(event: &CGEvent) -> CGEvent {
        let consumed = event.clone();
        consumed.set_type(CGEventType::Null);
        consumed
    }

    pub(super) fn run_event_loop(
        router: Arc<EventRouter>,
        running: Arc<AtomicBool>,
        monitoring: Arc<AtomicBool>,
        startup_tx: Sender<Result<(), HotkeyError>>,
    ) {
        let tap_disabled = Arc::new(AtomicBool::new(false));
        let disabled_flag = Arc::clone(&tap_disabled);

        // Must stay fast and non-blocking, or macOS disables the tap
        let callback = move |_proxy: core_graphics::event::CGEventTapProxy,
                             event_type: CGEventType,
                             event: &CGEvent|
                             -> Option<CGEvent> {
            match event_type {
                CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                    warn!(?event_type, "event tap disabled by the system, re-enabling");
                    disabled_flag.store(true, Ordering::SeqCst);
                    None
                }
                _ => {
                    let input = to_input_event(event_type, event)?;
                    if router.route(&input) {
                        Some(swallowed(event))
                    } else {
                        None
                    }
                }
            }
        };

        let tap = match CGEventTap::new(
            CGEventTapLocation::Session,
            CGEventTapPlacement::HeadInsertEventTap,
            CGEventTapOptions::Default,
            vec![
                CGEventType::KeyDown,
                CGEventType::KeyUp,
                CGEventType::FlagsChanged,
                CGEventType::OtherMouseDown,
                CGEventType::OtherMouseUp,
            ],
            callback,
        ) {
            Ok(tap) => tap,
            Err(()) => {
                error!("failed to create event tap - is Accessibility permission granted?");
                let _ = startup_tx.send(Err(HotkeyError::EventTapCreation));
                return;
            }
        };

        let source = match tap.mach_port.create_runloop_source(0) {
            Ok(source) => source,
            Err(()) => {
                let _ = startup_tx.send(Err(HotkeyError::EventTapCreation));
                return;
            }
        };

        let run_loop = CFRunLoop::get_current();
        unsafe {
            run_loop.add_source(&source, kCFRunLoopCommonModes);
        }
        tap.enable();
        monitoring.store(true, Ordering::SeqCst);
        info!("event tap created and enabled");

        if startup_tx.send(Ok(())).is_err() {
            return;
        }

        while running.load(Ordering::SeqCst) {
            CFRunLoop::run_in_mode(
                unsafe { kCFRunLoopDefaultMode },
                Duration::from_millis(100),
                true,
            );

            if tap_disabled.swap(false, Ordering::SeqCst) {
                tap.enable();
                debug!("event tap re-enabled");
            }
        }

        unsafe {
            run_loop.remove_source(&source, kCFRunLoopCommonModes);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::NoFocus;
    use crate::session::model::RecordingFlag;
    use crate::trigger::{Gestures, TriggerConfiguration, TriggerStore};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn listener() -> HotkeyListener {
        let (tx, _rx) = mpsc::unbounded_channel();
        let router = EventRouter::new(
            Arc::new(TriggerStore::new(
                TriggerConfiguration::default_record(),
                TriggerConfiguration::default_auxiliary(),
            )),
            Arc::new(Gestures::new(Duration::from_millis(400))),
            RecordingFlag::new(),
            Arc::new(NoFocus),
            tx,
        );
        HotkeyListener::new(Arc::new(router))
    }

    #[test]
    fn test_listener_creation() {
        let listener = listener();
        assert!(!listener.is_monitoring());
    }

    #[cfg(not(target_os = "macos"))]
    #[test]
    fn test_start_unsupported_off_macos() {
        let listener = listener();
        assert!(matches!(listener.start(), Err(HotkeyError::Unsupported)));
        // A failed start leaves the listener restartable
        assert!(matches!(listener.start(), Err(HotkeyError::Unsupported)));
        assert!(!listener.is_monitoring());
        assert!(matches!(
            listener.request_permission(),
            Err(HotkeyError::Unsupported)
        ));
    }
}
