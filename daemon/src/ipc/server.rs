//! Unix domain socket server for IPC
//!
//! Provides request-response communication and push notifications for
//! session changes to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::events::SessionEvent;
use crate::hotkey::HotkeyListener;
use crate::session::ControllerHandle;
use crate::trigger::{ConfigError, TriggerStore};

use super::protocol::{DaemonStatus, Notification, Request, Response};

const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Daemon services the IPC surface fronts
pub struct ServerContext {
    pub controller: ControllerHandle,
    pub store: Arc<TriggerStore>,
    pub hotkeys: Arc<HotkeyListener>,
    pub events: broadcast::Sender<SessionEvent>,
}

struct Shared {
    context: ServerContext,
    start_time: Instant,
}

type Writer = Arc<Mutex<OwnedWriteHalf>>;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    /// Bind the socket, replacing a stale one
    pub fn new(socket_path: &Path, context: ServerContext) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only access
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            shared: Arc::new(Shared {
                context,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let shared = Arc::clone(&self.shared);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, shared) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, shared: Arc<Shared>) -> Result<()> {
        let (mut reader, writer) = stream.into_split();
        let writer: Writer = Arc::new(Mutex::new(writer));
        let mut forwarder: Option<JoinHandle<()>> = None;

        let result = async {
            while let Some(body) = read_frame(&mut reader).await? {
                let request = match serde_json::from_slice::<Request>(&body) {
                    Ok(request) => request,
                    Err(e) => {
                        warn!(?e, "failed to parse request");
                        let response = Response::error("invalid_request", e.to_string());
                        write_frame(&mut *writer.lock().await, &response).await?;
                        continue;
                    }
                };
                debug!(?request, "received request");

                if request == Request::Subscribe {
                    // Receivers exist before the confirmation goes out
                    let events = shared.context.events.subscribe();
                    let status = shared.context.controller.subscribe_status();
                    write_frame(&mut *writer.lock().await, &Response::Subscribed).await?;
                    if forwarder.is_none() {
                        debug!("client subscribed to notifications");
                        forwarder = Some(tokio::spawn(forward_notifications(
                            Arc::clone(&writer),
                            events,
                            status,
                        )));
                    }
                    continue;
                }

                let response = Self::process_request(request, &shared).await;
                write_frame(&mut *writer.lock().await, &response).await?;
            }
            debug!("client disconnected");
            Ok::<(), anyhow::Error>(())
        }
        .await;

        if let Some(forwarder) = forwarder {
            forwarder.abort();
        }
        result
    }

    /// Process a request and return a response
    async fn process_request(request: Request, shared: &Shared) -> Response {
        let context = &shared.context;
        let applied = match request {
            Request::Ping => return Response::Pong,

            Request::GetStatus => {
                return Response::Status(DaemonStatus {
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    session: context.controller.status(),
                    triggers: (*context.store.snapshot()).clone(),
                    monitoring: context.hotkeys.is_monitoring(),
                    uptime_secs: shared.start_time.elapsed().as_secs(),
                })
            }

            // Handled by the connection loop
            Request::Subscribe => return Response::Subscribed,

            Request::SetTriggerMode { role, mode } => {
                info!(%role, %mode, "trigger mode change requested via IPC");
                context.controller.set_trigger_mode(role, mode).await
            }

            Request::SetTriggerKey {
                role,
                key_code,
                modifiers,
            } => {
                info!(%role, key_code, %modifiers, "trigger key change requested via IPC");
                context
                    .controller
                    .set_trigger_key(role, key_code, modifiers)
                    .await
            }

            Request::SetEnabled { role, enabled } => {
                info!(%role, enabled, "trigger enable change requested via IPC");
                context.controller.set_enabled(role, enabled).await
            }

            Request::ResetSession => context.controller.reset().await,

            Request::CancelSession => context.controller.cancel().await,

            Request::RequestPermission => {
                let hotkeys = Arc::clone(&context.hotkeys);
                return match tokio::task::spawn_blocking(move || {
                    let granted = hotkeys.request_permission();
                    (granted, hotkeys.is_monitoring())
                })
                .await
                {
                    Ok((Ok(granted), monitoring)) => Response::Permission {
                        granted,
                        monitoring,
                    },
                    Ok((Err(e), _)) => Response::error("permission_unavailable", e.to_string()),
                    Err(e) => Response::error("internal", e.to_string()),
                };
            }
        };

        match applied {
            Ok(()) => Response::Ok,
            Err(e) => config_error_response(&e),
        }
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

fn config_error_response(error: &ConfigError) -> Response {
    warn!(error = %error, "request refused");
    Response::error(error.code(), error.to_string())
}

/// Push session events and status changes until the client goes away
async fn forward_notifications(
    writer: Writer,
    mut events: broadcast::Receiver<SessionEvent>,
    mut status: tokio::sync::watch::Receiver<crate::session::SessionSnapshot>,
) {
    status.borrow_and_update();
    loop {
        let notification = tokio::select! {
            event = events.recv() => match event {
                Ok(event) => Notification::SessionEvent { event },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "notification receiver lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                Notification::StatusChanged(status.borrow_and_update().clone())
            }
        };

        if let Err(e) = write_frame(&mut *writer.lock().await, &notification).await {
            debug!(?e, "stopping notifications");
            break;
        }
    }
}

/// Read one length-prefixed message; `None` on a clean disconnect
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        anyhow::bail!("message too large: {} bytes", len);
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Send a length-prefixed JSON message
async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<()>
where
    W: AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::collab::NoFocus;
    use crate::session::testing::Harness;
    use crate::session::controller::TriggerTransition;
    use crate::trigger::{EventRouter, TriggerMode};

    struct Client {
        stream: UnixStream,
    }

    impl Client {
        async fn connect(path: &Path) -> Self {
            Self {
                stream: UnixStream::connect(path).await.unwrap(),
            }
        }

        async fn request(&mut self, request: Value) -> Value {
            write_frame(&mut self.stream, &request).await.unwrap();
            self.next().await
        }

        async fn next(&mut self) -> Value {
            let body = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut self.stream))
                .await
                .expect("no message from server")
                .unwrap()
                .expect("server closed the connection");
            serde_json::from_slice(&body).unwrap()
        }
    }

    fn start_server(
        h: &Harness,
        name: &str,
    ) -> (Arc<Server>, PathBuf, broadcast::Sender<SessionEvent>) {
        let dir = std::env::temp_dir().join(format!("voxtype-ipc-{}-{}", name, std::process::id()));
        let socket_path = dir.join("daemon.sock");
        let router = EventRouter::new(
            h.store.clone(),
            h.gestures.clone(),
            h.recording.clone(),
            Arc::new(NoFocus),
            h.tx.clone(),
        );
        let (events, _) = broadcast::channel(64);
        let server = Server::new(
            &socket_path,
            ServerContext {
                controller: h.handle.clone(),
                store: h.store.clone(),
                hotkeys: Arc::new(HotkeyListener::new(Arc::new(router))),
                events: events.clone(),
            },
        )
        .unwrap();
        let server = Arc::new(server);
        let running = Arc::clone(&server);
        tokio::spawn(async move { running.run().await });
        (server, socket_path, events)
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let h = Harness::spawn_default();
        let (server, path, _events) = start_server(&h, "status");
        let mut client = Client::connect(&path).await;

        assert_eq!(client.request(json!({"type": "ping"})).await["type"], "pong");

        let status = client.request(json!({"type": "get_status"})).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["session"]["status"], "idle");
        assert_eq!(status["triggers"]["record"]["mode"], "hold_key");
        assert_eq!(status["monitoring"], false);

        server.shutdown().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_trigger_mutation_over_ipc() {
        let h = Harness::spawn_default();
        let (server, path, _events) = start_server(&h, "mutate");
        let mut client = Client::connect(&path).await;

        let response = client
            .request(json!({"type": "set_trigger_mode", "role": "record", "mode": "double_tap_toggle"}))
            .await;
        assert_eq!(response["type"], "ok");
        assert_eq!(h.store.snapshot().record.config.mode, TriggerMode::DoubleTapToggle);

        let response = client
            .request(json!({"type": "set_trigger_key", "role": "record", "key_code": 49}))
            .await;
        assert_eq!(response["type"], "error");
        assert_eq!(response["code"], "not_a_modifier_key");

        let response = client.request(json!({"type": "set_mode"})).await;
        assert_eq!(response["code"], "invalid_request");

        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_subscriber_receives_session_events() {
        let h = Harness::spawn_default();
        let (server, socket_path, events) = start_server(&h, "subscribe");

        let mut client = Client::connect(&socket_path).await;
        assert_eq!(client.request(json!({"type": "subscribe"})).await["type"], "subscribed");

        events
            .send(SessionEvent::RecordingCancelled)
            .unwrap();
        h.send(TriggerTransition::Start {
            mode: TriggerMode::HoldKey,
            focus: None,
        });

        let mut saw_event = false;
        let mut saw_status = false;
        while !(saw_event && saw_status) {
            let message = client.next().await;
            match message["type"].as_str() {
                Some("session_event") => {
                    assert_eq!(message["event"]["type"], "recording_cancelled");
                    saw_event = true;
                }
                Some("status_changed") => {
                    assert_eq!(message["status"], "recording");
                    saw_status = true;
                }
                other => panic!("unexpected message {:?}", other),
            }
        }

        server.shutdown().await;
    }
}
