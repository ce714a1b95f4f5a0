//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::events::SessionEvent;
use crate::hotkey::keys::ModifierMask;
use crate::session::model::SessionSnapshot;
use crate::trigger::{TriggerMode, TriggerRole, TriggerSnapshot};

/// Requests from UI to daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to session notifications
    Subscribe,

    /// Change the gesture family of a trigger
    SetTriggerMode { role: TriggerRole, mode: TriggerMode },

    /// Bind a trigger to a key (or mouse button for mouse hold)
    SetTriggerKey {
        role: TriggerRole,
        key_code: u16,
        #[serde(default)]
        modifiers: ModifierMask,
    },

    /// Enable or disable a trigger
    SetEnabled { role: TriggerRole, enabled: bool },

    /// Return a completed or failed session to idle now
    ResetSession,

    /// Abort the current recording
    CancelSession,

    /// Prompt for the input monitoring permission
    RequestPermission,
}

/// Responses from daemon to UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Current daemon status
    Status(DaemonStatus),

    /// Pong response to ping
    Pong,

    /// Subscription confirmed
    Subscribed,

    /// Request applied
    Ok,

    /// Permission state after a prompt
    Permission { granted: bool, monitoring: bool },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification from daemon to UI (for subscribed clients)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Published session state changed
    StatusChanged(SessionSnapshot),
    /// Session event occurred
    SessionEvent { event: SessionEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Recording session state
    pub session: SessionSnapshot,

    /// Both trigger definitions as currently published
    pub triggers: TriggerSnapshot,

    /// Whether global input monitoring is active
    pub monitoring: bool,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::model::SessionStatus;

    #[test]
    fn test_request_serialization() {
        let req = Request::SetTriggerMode {
            role: TriggerRole::Record,
            mode: TriggerMode::DoubleTapToggle,
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("set_trigger_mode"));
        assert!(json.contains("double_tap_toggle"));
    }

    #[test]
    fn test_set_key_modifiers_default_to_none() {
        let req: Request =
            serde_json::from_str(r#"{"type":"set_trigger_key","role":"auxiliary","key_code":105}"#)
                .unwrap();
        assert_eq!(
            req,
            Request::SetTriggerKey {
                role: TriggerRole::Auxiliary,
                key_code: 105,
                modifiers: ModifierMask::NONE,
            }
        );
    }

    #[test]
    fn test_notification_keeps_event_tag() {
        let note = Notification::SessionEvent {
            event: SessionEvent::SessionReset,
        };
        let json = serde_json::to_string(&note).unwrap();
        assert_eq!(json, r#"{"type":"session_event","event":{"type":"session_reset"}}"#);

        let note = Notification::StatusChanged(SessionSnapshot {
            status: SessionStatus::Recording,
            ..Default::default()
        });
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains(r#""type":"status_changed""#));
        assert!(json.contains(r#""status":"recording""#));
    }
}
