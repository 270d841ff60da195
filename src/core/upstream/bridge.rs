//! Upstream bridge: connection lifecycle, outbound queue, and the
//! per-connection listener task.
//!
//! Each session has at most one upstream connection. The socket is owned by
//! a single spawned task that `select!`s between the outbound queue, the
//! session's cancellation token, and a read-timeout-bounded receive; the
//! read timeout is a liveness re-check, not a failure. Every loop iteration
//! handles its own errors so one bad frame never kills the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::translate::{self, RelayAction, SessionPhase};
use crate::core::upstream::connector::{UpstreamConnector, UpstreamTransport};
use crate::core::upstream::events::{ConversationItem, ResponseConfig, UpstreamEvent, UpstreamRequest};
use crate::core::welcome;
use crate::errors::{RelayError, RelayResult};
use crate::handlers::relay::messages::OutgoingMessage;
use crate::session::{Session, SessionRegistry, UpstreamHandle};

const OUTBOUND_QUEUE: usize = 256;

/// Bridges sessions to the upstream provider.
#[derive(Clone)]
pub struct UpstreamBridge {
    connector: Arc<dyn UpstreamConnector>,
    registry: SessionRegistry,
    default_model: String,
    connect_timeout: Duration,
    read_timeout: Duration,
}

impl UpstreamBridge {
    pub fn new(
        connector: Arc<dyn UpstreamConnector>,
        registry: SessionRegistry,
        default_model: String,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            registry,
            default_model,
            connect_timeout,
            read_timeout,
        }
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    /// Open the upstream connection for a session.
    ///
    /// Connecting while already connected is a no-op. On failure one error
    /// event goes to the client and the error is returned; there is no
    /// automatic retry.
    pub async fn connect(&self, session_id: &str, model: &str) -> RelayResult<()> {
        let session = self.session(session_id)?;

        if let Some(handle) = session.upstream.lock().await.as_ref() {
            if handle.is_open() {
                debug!(client_id = %session_id, "upstream already connected");
                return Ok(());
            }
        }

        info!(client_id = %session_id, model = %model, "connecting upstream");
        let transport = match timeout(self.connect_timeout, self.connector.connect(model)).await {
            Err(_) => {
                let err = RelayError::ConnectTimeout(self.connect_timeout);
                self.report_connect_failure(session_id, &err).await;
                return Err(err);
            }
            Ok(Err(err)) => {
                self.report_connect_failure(session_id, &err).await;
                return Err(err);
            }
            Ok(Ok(transport)) => transport,
        };

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        let open = Arc::new(AtomicBool::new(true));
        let cancel = session.cancel.child_token();

        *session.upstream.lock().await = Some(UpstreamHandle {
            outbound: outbound_tx,
            open: open.clone(),
            model: model.to_string(),
            cancel: cancel.clone(),
        });
        {
            let mut voice = session.voice.lock().await;
            voice.phase = SessionPhase::AwaitingUpstream;
            voice.audio.clear();
        }

        tokio::spawn(run_connection(ConnectionTask {
            transport,
            outbound: outbound_rx,
            session,
            registry: self.registry.clone(),
            cancel,
            open,
            read_timeout: self.read_timeout,
            model: model.to_string(),
        }));
        Ok(())
    }

    async fn report_connect_failure(&self, session_id: &str, err: &RelayError) {
        warn!(client_id = %session_id, error = %err, "upstream connect failed");
        self.registry
            .send(&OutgoingMessage::error(err.to_string()), session_id)
            .await;
    }

    /// Queue a user text turn followed by a response request.
    pub async fn send_user_text(&self, session_id: &str, text: String) -> RelayResult<()> {
        self.send_request(
            session_id,
            &UpstreamRequest::ConversationItemCreate {
                item: ConversationItem::user_text(text),
            },
        )
        .await?;
        self.send_request(
            session_id,
            &UpstreamRequest::ResponseCreate {
                response: ResponseConfig::default(),
            },
        )
        .await
    }

    /// Queue a user audio turn followed by a response request.
    pub async fn send_user_audio(&self, session_id: &str, audio: String) -> RelayResult<()> {
        self.send_request(
            session_id,
            &UpstreamRequest::ConversationItemCreate {
                item: ConversationItem::user_audio(audio),
            },
        )
        .await?;
        self.send_request(
            session_id,
            &UpstreamRequest::ResponseCreate {
                response: ResponseConfig::default(),
            },
        )
        .await
    }

    /// Forward a raw upstream event composed by the client.
    pub async fn send_raw(&self, session_id: &str, event: Value) -> RelayResult<()> {
        let text = serde_json::to_string(&event)?;
        self.enqueue(session_id, text).await
    }

    async fn send_request(&self, session_id: &str, request: &UpstreamRequest) -> RelayResult<()> {
        let text = serde_json::to_string(request)?;
        self.enqueue(session_id, text).await
    }

    /// Queue one serialized event, connecting lazily if no upstream is open.
    /// Liveness is re-checked between the lazy connect and the send.
    async fn enqueue(&self, session_id: &str, text: String) -> RelayResult<()> {
        let session = self.session(session_id)?;

        let connected = session
            .upstream
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| handle.is_open());
        if !connected {
            let model = self.default_model.clone();
            self.connect(session_id, &model).await?;
        }

        let outbound = {
            let upstream = session.upstream.lock().await;
            match upstream.as_ref() {
                Some(handle) if handle.is_open() => handle.outbound.clone(),
                _ => return Err(RelayError::NotConnected),
            }
        };

        if outbound.send(text).await.is_err() {
            self.teardown_after_send_failure(&session).await;
            return Err(RelayError::UpstreamClosed);
        }
        Ok(())
    }

    async fn teardown_after_send_failure(&self, session: &Arc<Session>) {
        warn!(client_id = %session.id, "upstream send failed, tearing down");
        let model = {
            let mut upstream = session.upstream.lock().await;
            upstream.take().map(|handle| {
                handle.open.store(false, Ordering::SeqCst);
                handle.cancel.cancel();
                handle.model
            })
        };
        session.voice.lock().await.reset();
        self.registry
            .send(
                &OutgoingMessage::status(
                    false,
                    model,
                    Some("Upstream connection lost".to_string()),
                ),
                &session.id,
            )
            .await;
    }

    /// Close the upstream connection; the client session stays alive and may
    /// reconnect later.
    pub async fn disconnect(&self, session_id: &str) -> RelayResult<()> {
        let session = self.session(session_id)?;
        let handle = session.upstream.lock().await.take();
        if let Some(handle) = handle {
            handle.open.store(false, Ordering::SeqCst);
            handle.cancel.cancel();
            info!(client_id = %session_id, model = %handle.model, "upstream disconnected");
        }
        session.voice.lock().await.reset();
        Ok(())
    }

    fn session(&self, session_id: &str) -> RelayResult<Arc<Session>> {
        self.registry
            .get(session_id)
            .ok_or_else(|| RelayError::UnknownSession(session_id.to_string()))
    }
}

struct ConnectionTask {
    transport: Box<dyn UpstreamTransport>,
    outbound: mpsc::Receiver<String>,
    session: Arc<Session>,
    registry: SessionRegistry,
    cancel: CancellationToken,
    open: Arc<AtomicBool>,
    read_timeout: Duration,
    model: String,
}

/// The single task that owns one upstream socket for its whole life.
async fn run_connection(mut task: ConnectionTask) {
    // Whether the client should be told the upstream went away. Deliberate
    // teardown (cancellation, handle drop) stays quiet.
    let mut announce_loss = true;

    loop {
        tokio::select! {
            _ = task.cancel.cancelled() => {
                announce_loss = false;
                task.transport.close().await;
                break;
            }
            queued = task.outbound.recv() => match queued {
                Some(text) => {
                    if let Err(err) = task.transport.send_text(text).await {
                        warn!(client_id = %task.session.id, error = %err, "upstream send failed");
                        break;
                    }
                }
                None => {
                    announce_loss = false;
                    task.transport.close().await;
                    break;
                }
            },
            received = timeout(task.read_timeout, task.transport.recv_text()) => match received {
                // A quiet interval is not a failure; re-check liveness and
                // keep listening.
                Err(_) => {
                    if !task.transport.is_open() {
                        break;
                    }
                }
                Ok(None) => {
                    info!(client_id = %task.session.id, "upstream closed the connection");
                    break;
                }
                Ok(Some(Err(err))) => {
                    warn!(client_id = %task.session.id, error = %err, "upstream read failed");
                    break;
                }
                Ok(Some(Ok(text))) => handle_frame(&mut task, &text).await,
            },
        }
    }

    task.open.store(false, Ordering::SeqCst);
    finalize(task, announce_loss).await;
}

/// Translate one upstream frame and apply the resulting actions.
async fn handle_frame(task: &mut ConnectionTask, text: &str) {
    let event = match UpstreamEvent::parse(text) {
        Ok(event) => event,
        Err(err) => {
            warn!(client_id = %task.session.id, error = %err, "unparseable upstream frame");
            return;
        }
    };

    let mut deliver: Vec<OutgoingMessage> = Vec::new();
    let mut flush: Option<String> = None;
    let mut start_welcome = false;
    {
        let mut voice = task.session.voice.lock().await;
        let (actions, next) = translate::translate(voice.phase, event);
        voice.phase = next;
        for action in actions {
            match action {
                RelayAction::BufferAudio(chunk) => voice.audio.push_str(&chunk),
                RelayAction::FlushWelcomeAudio => flush = Some(std::mem::take(&mut voice.audio)),
                RelayAction::StartWelcome => {
                    voice.audio.clear();
                    start_welcome = true;
                }
                RelayAction::Notify(message) => deliver.push(message),
                RelayAction::Forward(payload) => {
                    deliver.push(OutgoingMessage::UpstreamResponse { data: payload });
                }
            }
        }
    }

    for message in deliver {
        task.registry.send(&message, &task.session.id).await;
    }

    if start_welcome {
        if let Err(err) = send_greeting(task.transport.as_mut()).await {
            warn!(client_id = %task.session.id, error = %err, "welcome request failed");
            {
                let mut voice = task.session.voice.lock().await;
                voice.phase = SessionPhase::Streaming;
                voice.audio.clear();
            }
            task.registry
                .send(
                    &OutgoingMessage::error("Failed to start welcome message"),
                    &task.session.id,
                )
                .await;
        }
    }

    if let Some(buffer) = flush {
        welcome::deliver_audio(&task.registry, &task.session.id, buffer).await;
    }
}

async fn send_greeting(transport: &mut dyn UpstreamTransport) -> RelayResult<()> {
    for request in welcome::greeting_requests() {
        let text = serde_json::to_string(&request)?;
        transport.send_text(text).await?;
    }
    Ok(())
}

/// Clear this connection's state off the session and, for an unexpected
/// loss, tell the client. The session itself survives.
async fn finalize(task: ConnectionTask, announce_loss: bool) {
    let ConnectionTask {
        session,
        registry,
        open,
        model,
        ..
    } = task;

    {
        let mut upstream = session.upstream.lock().await;
        if upstream
            .as_ref()
            .is_some_and(|handle| Arc::ptr_eq(&handle.open, &open))
        {
            *upstream = None;
        }
    }
    session.voice.lock().await.reset();

    if announce_loss {
        registry
            .send(
                &OutgoingMessage::status(
                    false,
                    Some(model),
                    Some("Upstream connection closed".to_string()),
                ),
                &session.id,
            )
            .await;
    }
}
