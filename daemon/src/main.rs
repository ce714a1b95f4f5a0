//! voxtype-daemon: Background daemon for push-to-talk dictation on macOS
//!
//! This daemon runs as a LaunchAgent and provides:
//! - Global trigger detection (hold key, double-tap, mouse hold) via CGEventTap
//! - The recording session lifecycle, from capture to transcript
//! - IPC server for menu bar app communication
//!
//! Audio capture, transcription and text insertion are collaborators behind
//! the traits in `collab`; the daemon ships with detached stand-ins.

mod collab;
mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod session;
mod trigger;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::collab::{Collaborators, NoFocus};
use crate::config::Config;
use crate::events::SessionEvent;
use crate::hotkey::HotkeyListener;
use crate::ipc::{Server, ServerContext};
use crate::lifecycle::ShutdownSignal;
use crate::session::{RecordingFlag, SessionController};
use crate::trigger::{EventRouter, Gestures, TriggerStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "voxtype-daemon starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, "configuration loaded");
    let settings = &config.settings;

    let mut shutdown = ShutdownSignal::new()?;

    // Trigger configuration and gesture state, shared with the event tap thread
    let store = Arc::new(TriggerStore::new(settings.record, settings.auxiliary));
    let gestures = Arc::new(Gestures::new(settings.timings.double_tap_window()));
    let recording = RecordingFlag::new();

    // Event tap thread and timers -> session controller
    let (controller_tx, controller_rx) = mpsc::unbounded_channel();
    // Session controller -> IPC subscribers
    let (event_tx, _event_rx) = broadcast::channel::<SessionEvent>(64);

    let controller = SessionController::new(
        Arc::clone(&store),
        Arc::clone(&gestures),
        recording.clone(),
        Collaborators::default(),
        settings.timings,
        controller_tx.clone(),
        event_tx.clone(),
    );
    let controller_handle = controller.handle();

    let router = EventRouter::new(
        Arc::clone(&store),
        gestures,
        recording,
        Arc::new(NoFocus),
        controller_tx,
    );
    let hotkeys = Arc::new(HotkeyListener::new(Arc::new(router)));

    // Start the event tap (runs on dedicated thread)
    match hotkeys.start() {
        Ok(()) => {
            info!("hotkey listener started");
        }
        Err(e) => {
            error!(%e, "failed to start hotkey listener");
            warn!("continuing without global triggers - grant Accessibility permission and request_permission over IPC");
        }
    }

    let server = Server::new(
        &config.socket_path,
        ServerContext {
            controller: controller_handle,
            store,
            hotkeys: Arc::clone(&hotkeys),
            events: event_tx.clone(),
        },
    )?;

    let mut log_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    tokio::select! {
        _ = controller.run(controller_rx) => {
            info!("session controller exited");
        }

        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        _ = async {
            loop {
                match log_rx.recv().await {
                    Ok(event) => info!(%event, "session event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "session event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("session event logger exited");
        }

        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    hotkeys.stop();
    server.shutdown().await;

    info!("voxtype-daemon stopped");

    Ok(())
}
