//! Session registry: per-client state, lifecycle, and best-effort delivery.
//!
//! All per-session mutable state lives here, behind an injected registry
//! rather than a global. Each session carries a cancellation token; client
//! disconnect cancels the whole tree (heartbeat and any upstream connection
//! task), while upstream loss leaves the session itself alive.

pub mod heartbeat;
pub mod transport;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::core::translate::SessionPhase;
use crate::handlers::relay::messages::OutgoingMessage;
use transport::ClientTransport;

/// Handle to a live upstream connection, held by its session.
///
/// The socket itself is owned by the connection task; the handle carries the
/// outbound queue and shared liveness flag.
pub struct UpstreamHandle {
    /// Serialized events for the connection task to send.
    pub outbound: mpsc::Sender<String>,
    /// Cleared by the connection task when the socket dies.
    pub open: Arc<AtomicBool>,
    pub model: String,
    /// Child of the session token; canceling it stops only the upstream.
    pub cancel: CancellationToken,
}

impl UpstreamHandle {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && !self.outbound.is_closed()
    }
}

/// Welcome phase and audio accumulation for one session.
///
/// The buffer is non-empty only while the phase is `GeneratingWelcome`.
#[derive(Debug, Default)]
pub struct VoiceState {
    pub phase: SessionPhase,
    pub audio: String,
}

impl VoiceState {
    pub fn reset(&mut self) {
        self.phase = SessionPhase::Idle;
        self.audio.clear();
    }
}

/// One connected client.
pub struct Session {
    pub id: String,
    pub client: Arc<dyn ClientTransport>,
    pub created_at: Instant,
    /// Root token for everything spawned on behalf of this session.
    pub cancel: CancellationToken,
    pub upstream: Mutex<Option<UpstreamHandle>>,
    pub voice: Mutex<VoiceState>,
}

/// Registry of live sessions, shared across handlers and tasks.
#[derive(Clone)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<String, Arc<Session>>>,
    heartbeat_interval: Duration,
}

impl SessionRegistry {
    pub fn new(heartbeat_interval: Duration) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            heartbeat_interval,
        }
    }

    /// Register a client and start its heartbeat. A stale session under the
    /// same id is torn down first.
    pub async fn connect(&self, id: String, client: Arc<dyn ClientTransport>) -> Arc<Session> {
        if let Some((_, stale)) = self.sessions.remove(&id) {
            warn!(client_id = %id, "replacing existing session");
            stale.cancel.cancel();
            stale.client.close().await;
        }

        let session = Arc::new(Session {
            id: id.clone(),
            client,
            created_at: Instant::now(),
            cancel: CancellationToken::new(),
            upstream: Mutex::new(None),
            voice: Mutex::new(VoiceState::default()),
        });
        self.sessions.insert(id.clone(), session.clone());
        heartbeat::spawn(
            self.clone(),
            id,
            session.cancel.child_token(),
            self.heartbeat_interval,
        );
        info!(client_id = %session.id, sessions = self.len(), "client connected");
        session
    }

    /// Remove a session and cancel everything running on its behalf.
    pub async fn disconnect(&self, id: &str) {
        if let Some((_, session)) = self.sessions.remove(id) {
            session.cancel.cancel();
            session.client.close().await;
            info!(client_id = %id, sessions = self.len(), "client disconnected");
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|entry| entry.value().clone())
    }

    /// Best-effort send. A failed send means the client is gone: the session
    /// is fully disconnected and the message is never retried.
    pub async fn send(&self, message: &OutgoingMessage, id: &str) -> bool {
        let Some(session) = self.get(id) else {
            return false;
        };
        let text = match serde_json::to_string(message) {
            Ok(text) => text,
            Err(err) => {
                error!(client_id = %id, error = %err, "failed to serialize outgoing message");
                return false;
            }
        };
        match session.client.send_text(text).await {
            Ok(()) => true,
            Err(err) => {
                warn!(client_id = %id, error = %err, "client send failed, disconnecting");
                self.disconnect(id).await;
                false
            }
        }
    }

    /// Tolerant upstream liveness check for a session.
    pub async fn is_upstream_connected(&self, id: &str) -> bool {
        match self.get(id) {
            Some(session) => session
                .upstream
                .lock()
                .await
                .as_ref()
                .is_some_and(|handle| handle.is_open()),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingClient;
    use super::*;

    fn registry() -> SessionRegistry {
        // Long interval keeps the heartbeat quiet during these tests.
        SessionRegistry::new(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_connect_and_send() {
        let registry = registry();
        let client = RecordingClient::new();
        registry.connect("c1".to_string(), client.clone()).await;
        assert_eq!(registry.len(), 1);

        assert!(
            registry
                .send(&OutgoingMessage::error("hello"), "c1")
                .await
        );
        assert_eq!(client.count_of("error"), 1);
    }

    #[tokio::test]
    async fn test_send_to_unknown_session_is_noop() {
        let registry = registry();
        assert!(!registry.send(&OutgoingMessage::error("x"), "ghost").await);
    }

    #[tokio::test]
    async fn test_failed_send_disconnects_session() {
        let registry = registry();
        let client = RecordingClient::new();
        registry.connect("c1".to_string(), client.clone()).await;
        client.start_failing();

        assert!(!registry.send(&OutgoingMessage::error("x"), "c1").await);
        assert!(registry.get("c1").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_cancels_session_token() {
        let registry = registry();
        let client = RecordingClient::new();
        let session = registry.connect("c1".to_string(), client).await;
        let child = session.cancel.child_token();

        registry.disconnect("c1").await;
        assert!(child.is_cancelled());
        assert!(registry.get("c1").is_none());
    }

    #[tokio::test]
    async fn test_reconnect_replaces_stale_session() {
        let registry = registry();
        let first = RecordingClient::new();
        let stale = registry.connect("c1".to_string(), first.clone()).await;

        let second = RecordingClient::new();
        registry.connect("c1".to_string(), second).await;
        assert_eq!(registry.len(), 1);
        assert!(stale.cancel.is_cancelled());
        assert!(!first.is_open());
    }

    #[tokio::test]
    async fn test_upstream_liveness_reflects_handle() {
        let registry = registry();
        let client = RecordingClient::new();
        let session = registry.connect("c1".to_string(), client).await;
        assert!(!registry.is_upstream_connected("c1").await);

        let (tx, _rx) = mpsc::channel(8);
        let open = Arc::new(AtomicBool::new(true));
        *session.upstream.lock().await = Some(UpstreamHandle {
            outbound: tx,
            open: open.clone(),
            model: "speech-02".to_string(),
            cancel: session.cancel.child_token(),
        });
        assert!(registry.is_upstream_connected("c1").await);

        open.store(false, Ordering::SeqCst);
        assert!(!registry.is_upstream_connected("c1").await);
    }
}
