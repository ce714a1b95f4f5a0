//! Recording session state machine
//!
//! The controller is the single owner of the recording session. Trigger
//! transitions from the event tap thread, timer expirations, transcription
//! results and configuration commands all arrive as `ControllerMessage`s on
//! one FIFO channel and are applied one at a time, so the session itself
//! needs no locking.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::collab::{CapturedAudio, Collaborators, FocusHandle, TranscriptionError, TranscriptionModel};
use crate::config::Timings;
use crate::events::SessionEvent;
use crate::hotkey::keys::ModifierMask;
use crate::trigger::{ConfigError, Gestures, TriggerConfiguration, TriggerMode, TriggerRole, TriggerStore};

use super::model::{RecordingFlag, RecordingSession, SessionSnapshot, SessionStatus};

/// Classified trigger outcome redispatched from the event tap thread
#[derive(Debug, Clone, PartialEq)]
pub enum TriggerTransition {
    /// Record trigger started (or toggled on)
    Start {
        mode: TriggerMode,
        focus: Option<FocusHandle>,
    },
    /// Record trigger ended (or toggled off)
    Stop,
    /// Auxiliary trigger fired
    AuxiliaryFired,
}

/// Requests from the configuration and UI surfaces
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    SetTriggerMode {
        role: TriggerRole,
        mode: TriggerMode,
    },
    SetTriggerKey {
        role: TriggerRole,
        key_code: u16,
        modifiers: ModifierMask,
    },
    SetEnabled {
        role: TriggerRole,
        enabled: bool,
    },
    /// Replace a whole trigger definition at once
    ReplaceTrigger {
        role: TriggerRole,
        config: TriggerConfiguration,
    },
    /// Leave Completed/Error immediately
    Reset,
    /// Abort a recording without transcribing it
    Cancel,
}

/// Everything the controller task reacts to
#[derive(Debug)]
pub enum ControllerMessage {
    Trigger(TriggerTransition),
    /// A mouse hold began; confirm it once the threshold has elapsed
    HoldArmed {
        role: TriggerRole,
        generation: u64,
        pressed_at: Instant,
    },
    HoldElapsed {
        role: TriggerRole,
        generation: u64,
    },
    DurationTick {
        epoch: u64,
    },
    LevelTick {
        epoch: u64,
    },
    AutoReset {
        epoch: u64,
    },
    TranscriptionFinished {
        epoch: u64,
        audio: CapturedAudio,
        result: Result<String, TranscriptionError>,
    },
    Command {
        command: ControlCommand,
        reply: oneshot::Sender<Result<(), ConfigError>>,
    },
}

/// Timer tasks belonging to the current session
#[derive(Debug, Default)]
struct SessionTimers {
    duration: Option<JoinHandle<()>>,
    level: Option<JoinHandle<()>>,
    auto_reset: Option<JoinHandle<()>>,
    transcription: Option<JoinHandle<()>>,
}

impl SessionTimers {
    fn cancel_ticks(&mut self) {
        for handle in [self.duration.take(), self.level.take()].into_iter().flatten() {
            handle.abort();
        }
    }

    fn cancel_auto_reset(&mut self) {
        if let Some(handle) = self.auto_reset.take() {
            handle.abort();
        }
    }

    fn abort_all(&mut self) {
        self.cancel_ticks();
        self.cancel_auto_reset();
        if let Some(handle) = self.transcription.take() {
            handle.abort();
        }
    }
}

/// The primary-context owner of the recording session
pub struct SessionController {
    session: RecordingSession,
    /// Mode of the trigger that started the current recording
    session_mode: Option<TriggerMode>,
    /// Incremented per session; timer messages from older sessions are dropped
    epoch: u64,
    model: TranscriptionModel,
    timings: Timings,
    store: Arc<TriggerStore>,
    gestures: Arc<Gestures>,
    recording: RecordingFlag,
    collaborators: Collaborators,
    timers: SessionTimers,
    self_tx: mpsc::UnboundedSender<ControllerMessage>,
    event_tx: broadcast::Sender<SessionEvent>,
    status_tx: watch::Sender<SessionSnapshot>,
}

impl SessionController {
    /// Create a controller in Idle.
    ///
    /// `self_tx` must be the sender half of the channel later passed to `run`;
    /// timers deliver their expirations through it.
    pub fn new(
        store: Arc<TriggerStore>,
        gestures: Arc<Gestures>,
        recording: RecordingFlag,
        collaborators: Collaborators,
        timings: Timings,
        self_tx: mpsc::UnboundedSender<ControllerMessage>,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let (status_tx, _) = watch::channel(SessionSnapshot::default());
        Self {
            session: RecordingSession::default(),
            session_mode: None,
            epoch: 0,
            model: TranscriptionModel::default(),
            timings,
            store,
            gestures,
            recording,
            collaborators,
            timers: SessionTimers::default(),
            self_tx,
            event_tx,
            status_tx,
        }
    }

    /// Command handle for the IPC server and other surfaces
    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            tx: self.self_tx.clone(),
            status: self.status_tx.subscribe(),
        }
    }

    /// Process messages until the channel closes
    pub async fn run(mut self, mut rx: mpsc::UnboundedReceiver<ControllerMessage>) {
        info!("session controller started in Idle state");
        self.publish();

        while let Some(message) = rx.recv().await {
            self.handle_message(message);
        }

        self.timers.abort_all();
        info!("session controller stopped");
    }

    fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::Trigger(TriggerTransition::Start { mode, focus }) => {
                self.start(mode, focus)
            }
            ControllerMessage::Trigger(TriggerTransition::Stop) => self.stop(false),
            ControllerMessage::Trigger(TriggerTransition::AuxiliaryFired) => self.fire_auxiliary(),
            ControllerMessage::HoldArmed {
                role,
                generation,
                pressed_at,
            } => self.arm_hold(role, generation, pressed_at),
            ControllerMessage::HoldElapsed { role, generation } => self.confirm_hold(role, generation),
            ControllerMessage::DurationTick { epoch } => self.on_duration_tick(epoch),
            ControllerMessage::LevelTick { epoch } => self.on_level_tick(epoch),
            ControllerMessage::AutoReset { epoch } => self.on_auto_reset(epoch),
            ControllerMessage::TranscriptionFinished {
                epoch,
                audio,
                result,
            } => self.finish(epoch, audio, result),
            ControllerMessage::Command { command, reply } => {
                let result = self.apply(command);
                let _ = reply.send(result);
            }
        }
    }

    /// Idle -> Recording
    fn start(&mut self, mode: TriggerMode, focus: Option<FocusHandle>) {
        if self.session.status != SessionStatus::Idle {
            debug!(status = %self.session.status, "start ignored, session not idle");
            return;
        }

        self.epoch += 1;
        if !self.collaborators.audio.start_capture() {
            warn!(%mode, "audio capture failed to start");
            self.enter_error("audio capture failed to start".to_string());
            return;
        }

        let now = Instant::now();
        self.session.begin(now);
        self.session_mode = Some(mode);
        self.recording.set(true);

        self.timers.duration = Some(self.spawn_ticker(now, self.timings.duration_tick(), |epoch| {
            ControllerMessage::DurationTick { epoch }
        }));
        if mode.is_hold_based() {
            self.timers.level = Some(self.spawn_ticker(now, self.timings.level_tick(), |epoch| {
                ControllerMessage::LevelTick { epoch }
            }));
        }

        info!(
            from = %SessionStatus::Idle,
            to = %SessionStatus::Recording,
            %mode,
            focus = focus.as_ref().map(FocusHandle::as_str),
            "session transition"
        );
        self.emit(SessionEvent::RecordingStarted { mode, focus });
        self.publish();
    }

    /// Recording -> Processing
    fn stop(&mut self, auto_stopped: bool) {
        if self.session.status != SessionStatus::Recording {
            debug!(status = %self.session.status, "stop ignored, not recording");
            return;
        }

        self.timers.cancel_ticks();
        self.recording.set(false);
        if let Some(started_at) = self.session.started_at {
            self.session.elapsed = started_at.elapsed();
        }
        let duration_ms = self.session.elapsed.as_millis() as u64;
        self.session.status = SessionStatus::Processing;

        info!(
            from = %SessionStatus::Recording,
            to = %SessionStatus::Processing,
            duration_ms,
            auto_stopped,
            "session transition"
        );
        self.emit(SessionEvent::RecordingStopped {
            duration_ms,
            auto_stopped,
        });

        match self.collaborators.audio.stop_capture() {
            Some(audio) => {
                debug!(audio_ms = audio.duration().as_millis() as u64, "captured audio handed to transcription");
                self.spawn_transcription(audio);
                self.publish();
            }
            None => self.enter_error("no audio was captured".to_string()),
        }
    }

    /// Recording -> Idle, discarding audio
    fn cancel(&mut self) {
        if self.session.status != SessionStatus::Recording {
            debug!(status = %self.session.status, "cancel ignored, not recording");
            return;
        }

        self.timers.cancel_ticks();
        self.collaborators.audio.cancel_capture();
        self.recording.set(false);
        self.epoch += 1;
        self.session.clear();
        self.session_mode = None;

        info!(from = %SessionStatus::Recording, to = %SessionStatus::Idle, "session cancelled");
        self.emit(SessionEvent::RecordingCancelled);
        self.publish();
    }

    /// Processing -> Completed | Error
    fn finish(
        &mut self,
        epoch: u64,
        audio: CapturedAudio,
        result: Result<String, TranscriptionError>,
    ) {
        self.timers.transcription = None;
        if epoch != self.epoch || self.session.status != SessionStatus::Processing {
            debug!(epoch, current = self.epoch, "discarding stale transcription result");
            self.collaborators.audio.cleanup(audio);
            return;
        }

        match result {
            Ok(text) => {
                info!(
                    from = %SessionStatus::Processing,
                    to = %SessionStatus::Completed,
                    chars = text.chars().count(),
                    "session transition"
                );
                self.session.complete(text.clone());
                self.emit(SessionEvent::TranscriptReady { text });
                self.collaborators.audio.cleanup(audio);
                self.schedule_auto_reset();
                self.publish();
            }
            Err(e) => {
                self.collaborators.audio.cleanup(audio);
                self.enter_error(e.to_string());
            }
        }
    }

    fn enter_error(&mut self, message: String) {
        warn!(from = %self.session.status, error = %message, "session failed");
        self.timers.cancel_ticks();
        self.recording.set(false);
        self.session.fail(message.clone());
        self.emit(SessionEvent::SessionFailed { message });
        self.schedule_auto_reset();
        self.publish();
    }

    /// Completed | Error -> Idle, on request
    fn reset(&mut self) {
        if !matches!(
            self.session.status,
            SessionStatus::Completed | SessionStatus::Error
        ) {
            debug!(status = %self.session.status, "reset ignored");
            return;
        }
        self.timers.cancel_auto_reset();
        self.return_to_idle();
    }

    fn on_auto_reset(&mut self, epoch: u64) {
        self.timers.auto_reset = None;
        if epoch != self.epoch
            || !matches!(
                self.session.status,
                SessionStatus::Completed | SessionStatus::Error
            )
        {
            return;
        }
        self.return_to_idle();
    }

    fn return_to_idle(&mut self) {
        info!(from = %self.session.status, to = %SessionStatus::Idle, "session transition");
        self.session.clear();
        self.session_mode = None;
        self.emit(SessionEvent::SessionReset);
        self.publish();
    }

    fn on_duration_tick(&mut self, epoch: u64) {
        if epoch != self.epoch || self.session.status != SessionStatus::Recording {
            return;
        }
        let Some(started_at) = self.session.started_at else {
            return;
        };

        self.session.elapsed = started_at.elapsed();
        if self.session.elapsed >= self.timings.max_recording() {
            info!(
                limit_ms = self.timings.max_recording_ms,
                "maximum recording duration reached"
            );
            self.stop(true);
        } else {
            self.publish();
        }
    }

    fn on_level_tick(&mut self, epoch: u64) {
        if epoch != self.epoch || self.session.status != SessionStatus::Recording {
            return;
        }
        let level = self.collaborators.audio.current_level();
        self.session.set_level(level);
        self.publish();
    }

    fn fire_auxiliary(&mut self) {
        self.model = self.model.next();
        info!(model = %self.model, "auxiliary trigger fired, transcription model changed");
        self.emit(SessionEvent::AuxiliaryTriggerFired { model: self.model });
        self.publish();
    }

    fn arm_hold(&self, role: TriggerRole, generation: u64, pressed_at: Instant) {
        let deadline = pressed_at + self.timings.hold_confirm();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            time::sleep_until(deadline).await;
            let _ = tx.send(ControllerMessage::HoldElapsed { role, generation });
        });
    }

    fn confirm_hold(&mut self, role: TriggerRole, generation: u64) {
        let gestures = self.gestures.get(role);
        let Some(focus) = gestures.hold.confirm(generation) else {
            debug!(%role, generation, "hold released before confirmation");
            return;
        };

        let snapshot = self.store.snapshot();
        let trigger = snapshot.get(role);
        if !trigger.is_live() || trigger.config.mode != TriggerMode::MouseHold {
            gestures.hold.reset();
            return;
        }

        debug!(%role, generation, "mouse hold confirmed");
        match role {
            TriggerRole::Record => self.start(TriggerMode::MouseHold, focus),
            TriggerRole::Auxiliary => self.fire_auxiliary(),
        }
    }

    fn apply(&mut self, command: ControlCommand) -> Result<(), ConfigError> {
        match command {
            ControlCommand::SetTriggerMode { role, mode } => {
                self.reconfigure(role, |config| config.mode = mode)
            }
            ControlCommand::SetTriggerKey {
                role,
                key_code,
                modifiers,
            } => self.reconfigure(role, |config| {
                config.key_code = key_code;
                config.modifiers = modifiers;
            }),
            ControlCommand::SetEnabled { role, enabled } => {
                self.reconfigure(role, |config| config.enabled = enabled)
            }
            ControlCommand::ReplaceTrigger { role, config } => {
                self.reconfigure(role, |current| *current = config)
            }
            ControlCommand::Reset => {
                self.reset();
                Ok(())
            }
            ControlCommand::Cancel => {
                self.cancel();
                Ok(())
            }
        }
    }

    /// Publish an edited trigger and abort gestures made under the old one
    fn reconfigure(
        &mut self,
        role: TriggerRole,
        edit: impl FnOnce(&mut TriggerConfiguration),
    ) -> Result<(), ConfigError> {
        let mut config = self.store.snapshot().get(role).config;
        edit(&mut config);

        let Some(previous) = self.store.update(role, config)? else {
            return Ok(());
        };
        self.gestures.get(role).invalidate();

        if role == TriggerRole::Record && self.session.status == SessionStatus::Recording {
            info!(
                from = %previous.mode,
                to = %config.mode,
                session_mode = ?self.session_mode,
                "record trigger reconfigured mid-session, stopping recording"
            );
            self.stop(false);
        }
        Ok(())
    }

    fn spawn_ticker(
        &self,
        start: Instant,
        period: Duration,
        make: fn(u64) -> ControllerMessage,
    ) -> JoinHandle<()> {
        let tx = self.self_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let mut ticker = time::interval_at(start + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(make(epoch)).is_err() {
                    break;
                }
            }
        })
    }

    fn spawn_transcription(&mut self, audio: CapturedAudio) {
        let future = self.collaborators.transcriber.transcribe(&audio, self.model);
        let tx = self.self_tx.clone();
        let epoch = self.epoch;
        debug!(id = audio.id, model = %self.model, "transcription requested");
        self.timers.transcription = Some(tokio::spawn(async move {
            let result = future.await;
            let _ = tx.send(ControllerMessage::TranscriptionFinished {
                epoch,
                audio,
                result,
            });
        }));
    }

    fn schedule_auto_reset(&mut self) {
        self.timers.cancel_auto_reset();
        let tx = self.self_tx.clone();
        let epoch = self.epoch;
        let delay = self.timings.auto_reset();
        self.timers.auto_reset = Some(tokio::spawn(async move {
            time::sleep(delay).await;
            let _ = tx.send(ControllerMessage::AutoReset { epoch });
        }));
    }

    fn emit(&self, event: SessionEvent) {
        debug!(%event, "emitting session event");
        let _ = self.event_tx.send(event);
    }

    fn publish(&self) {
        self.status_tx
            .send_replace(self.session.snapshot(self.model));
    }
}

/// Cloneable command interface to a running controller
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::UnboundedSender<ControllerMessage>,
    status: watch::Receiver<SessionSnapshot>,
}

impl ControllerHandle {
    pub async fn set_trigger_mode(&self, role: TriggerRole, mode: TriggerMode) -> Result<(), ConfigError> {
        self.command(ControlCommand::SetTriggerMode { role, mode }).await
    }

    pub async fn set_trigger_key(
        &self,
        role: TriggerRole,
        key_code: u16,
        modifiers: ModifierMask,
    ) -> Result<(), ConfigError> {
        self.command(ControlCommand::SetTriggerKey {
            role,
            key_code,
            modifiers,
        })
        .await
    }

    pub async fn set_enabled(&self, role: TriggerRole, enabled: bool) -> Result<(), ConfigError> {
        self.command(ControlCommand::SetEnabled { role, enabled }).await
    }

    pub async fn replace_trigger(
        &self,
        role: TriggerRole,
        config: TriggerConfiguration,
    ) -> Result<(), ConfigError> {
        self.command(ControlCommand::ReplaceTrigger { role, config }).await
    }

    pub async fn reset(&self) -> Result<(), ConfigError> {
        self.command(ControlCommand::Reset).await
    }

    pub async fn cancel(&self) -> Result<(), ConfigError> {
        self.command(ControlCommand::Cancel).await
    }

    /// Latest published session state
    pub fn status(&self) -> SessionSnapshot {
        self.status.borrow().clone()
    }

    /// Observable session state stream
    pub fn subscribe_status(&self) -> watch::Receiver<SessionSnapshot> {
        self.status.clone()
    }

    async fn command(&self, command: ControlCommand) -> Result<(), ConfigError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(ControllerMessage::Command { command, reply })
            .map_err(|_| ConfigError::ControllerClosed)?;
        response.await.map_err(|_| ConfigError::ControllerClosed)?
    }
}
