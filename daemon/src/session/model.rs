//! Recording session data owned by the controller task

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::collab::TranscriptionModel;

/// Lifecycle status of the recording session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for the record trigger
    #[default]
    Idle,
    /// Capturing audio
    Recording,
    /// Waiting for the transcription result
    Processing,
    /// Transcript available, auto-reset pending
    Completed,
    /// Session failed, auto-reset pending
    Error,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Idle => write!(f, "Idle"),
            SessionStatus::Recording => write!(f, "Recording"),
            SessionStatus::Processing => write!(f, "Processing"),
            SessionStatus::Completed => write!(f, "Completed"),
            SessionStatus::Error => write!(f, "Error"),
        }
    }
}

/// The one live session. Fields are reset in place between sessions.
#[derive(Debug, Clone, Default)]
pub struct RecordingSession {
    pub status: SessionStatus,
    pub started_at: Option<Instant>,
    pub elapsed: Duration,
    pub audio_level: f32,
    pub last_error: Option<String>,
    pub last_transcript: Option<String>,
}

impl RecordingSession {
    /// Enter Recording at `now`
    pub fn begin(&mut self, now: Instant) {
        self.status = SessionStatus::Recording;
        self.started_at = Some(now);
        self.elapsed = Duration::ZERO;
        self.audio_level = 0.0;
        self.last_error = None;
    }

    pub fn set_level(&mut self, level: f32) {
        self.audio_level = if level.is_finite() {
            level.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    pub fn complete(&mut self, transcript: String) {
        self.status = SessionStatus::Completed;
        self.last_transcript = Some(transcript);
        self.last_error = None;
    }

    pub fn fail(&mut self, message: String) {
        self.status = SessionStatus::Error;
        self.last_error = Some(message);
        self.last_transcript = None;
    }

    /// Back to Idle; the last transcript is kept for display
    pub fn clear(&mut self) {
        self.status = SessionStatus::Idle;
        self.started_at = None;
        self.elapsed = Duration::ZERO;
        self.audio_level = 0.0;
        self.last_error = None;
    }

    pub fn snapshot(&self, model: TranscriptionModel) -> SessionSnapshot {
        SessionSnapshot {
            status: self.status,
            elapsed_ms: self.elapsed.as_millis() as u64,
            audio_level: self.audio_level,
            last_error: self.last_error.clone(),
            last_transcript: self.last_transcript.clone(),
            model,
        }
    }
}

/// Serializable view of the session for UI binding
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub elapsed_ms: u64,
    pub audio_level: f32,
    pub last_error: Option<String>,
    pub last_transcript: Option<String>,
    pub model: TranscriptionModel,
}

/// "Recording in progress" flag published to the event tap thread
#[derive(Debug, Clone, Default)]
pub struct RecordingFlag(Arc<AtomicBool>);

impl RecordingFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn set(&self, recording: bool) {
        self.0.store(recording, Ordering::Release);
    }
}
