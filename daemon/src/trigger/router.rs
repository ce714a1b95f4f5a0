//! Event tap side of the trigger pipeline
//!
//! Classifies each raw event against both triggers and forwards resulting
//! transitions to the session controller. Sending never blocks, so the event
//! tap callback returns promptly whatever the controller is doing.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::collab::FocusProbe;
use crate::hotkey::event::InputEvent;
use crate::session::controller::{ControllerMessage, TriggerTransition};
use crate::session::model::RecordingFlag;

use super::config::{TriggerConfiguration, TriggerRole, TriggerStore};
use super::matcher::{Gestures, TriggerMatcher, Verdict};

const ROLES: [TriggerRole; 2] = [TriggerRole::Record, TriggerRole::Auxiliary];

pub struct EventRouter {
    store: Arc<TriggerStore>,
    gestures: Arc<Gestures>,
    recording: RecordingFlag,
    focus: Arc<dyn FocusProbe>,
    tx: UnboundedSender<ControllerMessage>,
}

impl EventRouter {
    pub fn new(
        store: Arc<TriggerStore>,
        gestures: Arc<Gestures>,
        recording: RecordingFlag,
        focus: Arc<dyn FocusProbe>,
        tx: UnboundedSender<ControllerMessage>,
    ) -> Self {
        Self {
            store,
            gestures,
            recording,
            focus,
            tx,
        }
    }

    /// Route one event. Returns true when the event must be swallowed.
    pub fn route(&self, event: &InputEvent) -> bool {
        let snapshot = self.store.snapshot();
        let mut consumed = false;

        for role in ROLES {
            let trigger = snapshot.get(role);
            if !trigger.is_live() {
                continue;
            }
            let session_active = role == TriggerRole::Record && self.recording.is_set();
            let verdict = TriggerMatcher::new(self.gestures.get(role)).classify(
                event,
                &trigger.config,
                session_active,
            );
            consumed |= verdict.consumes();
            self.dispatch(role, &trigger.config, event, verdict);
        }

        consumed
    }

    fn dispatch(
        &self,
        role: TriggerRole,
        trigger: &TriggerConfiguration,
        event: &InputEvent,
        verdict: Verdict,
    ) {
        if let Some(generation) = verdict.hold_armed {
            self.gestures
                .get(role)
                .hold
                .attach_focus(generation, self.focus.snapshot());
            self.send(ControllerMessage::HoldArmed {
                role,
                generation,
                pressed_at: event.timestamp,
            });
        }

        let classification = verdict.classification;
        let transition = match role {
            TriggerRole::Record if classification.starts() => Some(TriggerTransition::Start {
                mode: trigger.mode,
                focus: None,
            }),
            TriggerRole::Record if classification.stops() => Some(TriggerTransition::Stop),
            TriggerRole::Auxiliary if classification.starts() => {
                Some(TriggerTransition::AuxiliaryFired)
            }
            _ => None,
        };

        if let Some(transition) = transition {
            debug!(%role, ?classification, key_code = event.key_code, "trigger matched");
            self.send(ControllerMessage::Trigger(transition));
        }
    }

    fn send(&self, message: ControllerMessage) {
        if self.tx.send(message).is_err() {
            warn!("session controller is gone, dropping trigger transition");
        }
    }
}
