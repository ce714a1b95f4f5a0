//! Scripted collaborators and a running-controller harness for tests

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time;

use crate::collab::{
    AudioCapture, CapturedAudio, Collaborators, TranscriptionError, TranscriptionFuture,
    TranscriptionModel, Transcriber,
};
use crate::config::Timings;
use crate::events::SessionEvent;
use crate::trigger::{Gestures, TriggerConfiguration, TriggerStore};

use super::controller::{ControllerHandle, ControllerMessage, SessionController, TriggerTransition};
use super::model::{RecordingFlag, SessionSnapshot, SessionStatus};

/// What the scripted capture was asked to do
#[derive(Debug, Default)]
pub struct CaptureLog {
    pub started: usize,
    pub stopped: usize,
    pub cancelled: usize,
    pub cleaned: Vec<u64>,
}

pub struct ScriptedCapture {
    pub log: Arc<Mutex<CaptureLog>>,
    pub starts: bool,
    pub level: f32,
    next_id: u64,
}

impl AudioCapture for ScriptedCapture {
    fn start_capture(&mut self) -> bool {
        self.log.lock().started += 1;
        self.starts
    }

    fn stop_capture(&mut self) -> Option<CapturedAudio> {
        self.log.lock().stopped += 1;
        self.next_id += 1;
        Some(CapturedAudio {
            id: self.next_id,
            samples: vec![0.0; 1_600],
            sample_rate: 16_000,
        })
    }

    fn cancel_capture(&mut self) {
        self.log.lock().cancelled += 1;
    }

    fn current_level(&self) -> f32 {
        self.level
    }

    fn cleanup(&mut self, audio: CapturedAudio) {
        self.log.lock().cleaned.push(audio.id);
    }
}

pub struct ScriptedTranscriber {
    pub delay: Duration,
    pub result: Result<String, TranscriptionError>,
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, _audio: &CapturedAudio, _model: TranscriptionModel) -> TranscriptionFuture {
        let delay = self.delay;
        let result = self.result.clone();
        Box::pin(async move {
            time::sleep(delay).await;
            result
        })
    }
}

/// A controller running on the test runtime plus everything wired to it
pub struct Harness {
    pub handle: ControllerHandle,
    pub tx: mpsc::UnboundedSender<ControllerMessage>,
    pub store: Arc<TriggerStore>,
    pub gestures: Arc<Gestures>,
    pub recording: RecordingFlag,
    pub capture: Arc<Mutex<CaptureLog>>,
    events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    pub fn spawn_default() -> Self {
        Self::spawn(true, Ok("hello world".to_string()), Timings::default())
    }

    pub fn spawn(
        capture_starts: bool,
        transcript: Result<String, TranscriptionError>,
        timings: Timings,
    ) -> Self {
        let store = Arc::new(TriggerStore::new(
            TriggerConfiguration::default_record(),
            TriggerConfiguration::default_auxiliary(),
        ));
        let gestures = Arc::new(Gestures::new(timings.double_tap_window()));
        let recording = RecordingFlag::new();
        let log = Arc::new(Mutex::new(CaptureLog::default()));
        let collaborators = Collaborators {
            audio: Box::new(ScriptedCapture {
                log: log.clone(),
                starts: capture_starts,
                level: 0.5,
                next_id: 0,
            }),
            transcriber: Arc::new(ScriptedTranscriber {
                delay: Duration::from_millis(200),
                result: transcript,
            }),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let (event_tx, events) = broadcast::channel(64);
        let controller = SessionController::new(
            store.clone(),
            gestures.clone(),
            recording.clone(),
            collaborators,
            timings,
            tx.clone(),
            event_tx,
        );
        let handle = controller.handle();
        tokio::spawn(controller.run(rx));

        Self {
            handle,
            tx,
            store,
            gestures,
            recording,
            capture: log,
            events,
        }
    }

    pub fn send(&self, transition: TriggerTransition) {
        self.tx
            .send(ControllerMessage::Trigger(transition))
            .expect("controller is running");
    }

    /// Let the controller drain everything queued so far
    pub async fn sync(&self) {
        time::sleep(Duration::from_millis(1)).await;
    }

    /// Wait until the published status reaches `status`
    pub async fn wait_for(&mut self, status: SessionStatus) -> SessionSnapshot {
        let mut rx = self.handle.subscribe_status();
        let wait = async {
            loop {
                let snapshot = rx.borrow_and_update().clone();
                if snapshot.status == status {
                    return snapshot;
                }
                rx.changed().await.expect("controller is running");
            }
        };
        time::timeout(Duration::from_secs(120), wait)
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {}", status))
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
