//! Events module for recording session lifecycle
//!
//! Provides structured notifications broadcast by the session controller
//! to the UI and other collaborators. Delivery is fire-and-forget.

use serde::{Deserialize, Serialize};

use crate::collab::{FocusHandle, TranscriptionModel};
use crate::trigger::TriggerMode;

/// Events emitted by the session controller during transitions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Record trigger fired and audio capture is running
    RecordingStarted {
        mode: TriggerMode,
        /// Frontmost application when a mouse hold began
        focus: Option<FocusHandle>,
    },

    /// Capture finished, audio handed to transcription
    RecordingStopped {
        /// Duration in milliseconds that recording was active
        duration_ms: u64,
        /// Stopped by the maximum duration rather than the trigger
        auto_stopped: bool,
    },

    /// Recording aborted, captured audio discarded
    RecordingCancelled,

    /// Transcription succeeded
    TranscriptReady { text: String },

    /// Session ended in error
    SessionFailed { message: String },

    /// Session returned to idle
    SessionReset,

    /// Secondary trigger fired; the active option changed
    AuxiliaryTriggerFired { model: TranscriptionModel },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::RecordingStarted { mode, .. } => write!(f, "RECORDING_STARTED ({})", mode),
            SessionEvent::RecordingStopped {
                duration_ms,
                auto_stopped,
            } => {
                if *auto_stopped {
                    write!(f, "RECORDING_STOPPED ({}ms, max duration)", duration_ms)
                } else {
                    write!(f, "RECORDING_STOPPED ({}ms)", duration_ms)
                }
            }
            SessionEvent::RecordingCancelled => write!(f, "RECORDING_CANCELLED"),
            SessionEvent::TranscriptReady { text } => {
                write!(f, "TRANSCRIPT_READY ({} chars)", text.chars().count())
            }
            SessionEvent::SessionFailed { message } => write!(f, "SESSION_FAILED ({})", message),
            SessionEvent::SessionReset => write!(f, "SESSION_RESET"),
            SessionEvent::AuxiliaryTriggerFired { model } => {
                write!(f, "AUXILIARY_TRIGGER_FIRED ({})", model)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = SessionEvent::RecordingStopped {
            duration_ms: 1500,
            auto_stopped: false,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("recording_stopped"));
        assert!(json.contains("1500"));
    }

    #[test]
    fn test_event_deserialization() {
        let json = r#"{"type":"auxiliary_trigger_fired","model":"smart"}"#;
        let event: SessionEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            SessionEvent::AuxiliaryTriggerFired {
                model: TranscriptionModel::Smart
            }
        );
    }

    #[test]
    fn test_display_marks_auto_stop() {
        let event = SessionEvent::RecordingStopped {
            duration_ms: 60_000,
            auto_stopped: true,
        };
        assert_eq!(event.to_string(), "RECORDING_STOPPED (60000ms, max duration)");
    }
}
