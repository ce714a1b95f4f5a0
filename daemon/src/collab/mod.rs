//! Seams to the collaborators around the session controller
//!
//! Audio capture, transcription and focus lookup live outside this daemon's
//! core. The controller only talks to them through these traits. The
//! detached implementations at the bottom are what the daemon runs with when
//! no backend is wired in: they keep the session lifecycle observable without
//! touching the microphone or the network.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Opaque reference to the frontmost application at press time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusHandle(String);

impl FocusHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Audio handed from capture to transcription
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedAudio {
    pub id: u64,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl CapturedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Transcription model option, switched by the auxiliary trigger
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptionModel {
    /// Low-latency model
    #[default]
    Fast,
    /// Slower, more accurate model
    Smart,
}

impl TranscriptionModel {
    pub fn next(self) -> Self {
        match self {
            TranscriptionModel::Fast => TranscriptionModel::Smart,
            TranscriptionModel::Smart => TranscriptionModel::Fast,
        }
    }
}

impl fmt::Display for TranscriptionModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptionModel::Fast => write!(f, "fast"),
            TranscriptionModel::Smart => write!(f, "smart"),
        }
    }
}

/// Errors surfaced by a transcription backend
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TranscriptionError {
    #[error("no transcription backend configured")]
    Unavailable,

    #[error("transcription service error: {0}")]
    Service(String),
}

pub type TranscriptionFuture =
    Pin<Box<dyn Future<Output = Result<String, TranscriptionError>> + Send + 'static>>;

/// Microphone capture, driven from the controller task
pub trait AudioCapture: Send {
    /// Begin capturing; false if the device could not be opened
    fn start_capture(&mut self) -> bool;
    /// Finish capturing and hand over what was recorded
    fn stop_capture(&mut self) -> Option<CapturedAudio>;
    /// Abort capturing and drop anything recorded
    fn cancel_capture(&mut self);
    /// Current input level in `[0, 1]`
    fn current_level(&self) -> f32;
    /// Release resources held for a finished capture
    fn cleanup(&mut self, audio: CapturedAudio);
}

/// Speech-to-text backend
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio: &CapturedAudio, model: TranscriptionModel) -> TranscriptionFuture;
}

/// Frontmost-application lookup.
///
/// Called on the event tap thread, so it must not block.
pub trait FocusProbe: Send + Sync {
    fn snapshot(&self) -> Option<FocusHandle>;
}

/// Capture that records silence, used when no audio backend is wired in
#[derive(Debug, Default)]
pub struct DetachedCapture {
    next_id: u64,
    active: bool,
}

impl AudioCapture for DetachedCapture {
    fn start_capture(&mut self) -> bool {
        self.active = true;
        debug!("detached capture started");
        true
    }

    fn stop_capture(&mut self) -> Option<CapturedAudio> {
        if !std::mem::take(&mut self.active) {
            return None;
        }
        self.next_id += 1;
        Some(CapturedAudio {
            id: self.next_id,
            samples: Vec::new(),
            sample_rate: 16_000,
        })
    }

    fn cancel_capture(&mut self) {
        self.active = false;
    }

    fn current_level(&self) -> f32 {
        0.0
    }

    fn cleanup(&mut self, audio: CapturedAudio) {
        debug!(id = audio.id, "detached capture cleaned up");
    }
}

/// Transcriber that always reports it has no backend
#[derive(Debug, Default)]
pub struct DetachedTranscriber;

impl Transcriber for DetachedTranscriber {
    fn transcribe(&self, audio: &CapturedAudio, model: TranscriptionModel) -> TranscriptionFuture {
        info!(id = audio.id, %model, "no transcription backend configured");
        Box::pin(async { Err(TranscriptionError::Unavailable) })
    }
}

/// Focus probe that never knows the frontmost application
#[derive(Debug, Default)]
pub struct NoFocus;

impl FocusProbe for NoFocus {
    fn snapshot(&self) -> Option<FocusHandle> {
        None
    }
}

/// Everything the controller needs from the outside world
pub struct Collaborators {
    pub audio: Box<dyn AudioCapture>,
    pub transcriber: Arc<dyn Transcriber>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            audio: Box::new(DetachedCapture::default()),
            transcriber: Arc::new(DetachedTranscriber),
        }
    }
}
