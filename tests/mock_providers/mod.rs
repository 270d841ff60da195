//! In-process mocks for the relay's collaborator traits.
//!
//! `RecordingClient` stands in for a browser WebSocket and records every
//! frame; `ScriptedConnector` hands out in-memory upstream transports whose
//! both ends the test controls.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use realtime_relay::core::upstream::{UpstreamConnector, UpstreamTransport};
use realtime_relay::errors::{RelayError, RelayResult};
use realtime_relay::session::transport::ClientTransport;

/// Client transport that records every outbound frame as parsed JSON.
pub struct RecordingClient {
    sent: StdMutex<Vec<Value>>,
    open: AtomicBool,
}

impl RecordingClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: StdMutex::new(Vec::new()),
            open: AtomicBool::new(true),
        })
    }

    pub fn messages(&self) -> Vec<Value> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn of_type(&self, message_type: &str) -> Vec<Value> {
        self.messages()
            .into_iter()
            .filter(|m| m["type"] == message_type)
            .collect()
    }

    pub fn count_of(&self, message_type: &str) -> usize {
        self.of_type(message_type).len()
    }
}

#[async_trait]
impl ClientTransport for RecordingClient {
    async fn send_text(&self, text: String) -> RelayResult<()> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(RelayError::ClientSendFailure("mock client closed".into()));
        }
        let value = serde_json::from_str(&text)?;
        self.sent.lock().expect("sent lock").push(value);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }
}

/// The test's ends of a scripted upstream transport.
pub struct ScriptHandle {
    /// Feed provider events to the relay.
    pub events: mpsc::Sender<String>,
    /// Observe what the relay sent upstream.
    pub sent: mpsc::Receiver<String>,
    fail_sends: Arc<AtomicBool>,
}

impl ScriptHandle {
    /// Make every subsequent relay-to-upstream send fail while the receive
    /// side keeps working.
    pub fn fail_sends(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }
}

impl ScriptHandle {
    /// Next relay-to-upstream frame, parsed, within a short deadline.
    pub async fn next_sent(&mut self) -> Value {
        let text = tokio::time::timeout(Duration::from_secs(2), self.sent.recv())
            .await
            .expect("timed out waiting for upstream send")
            .expect("upstream send channel closed");
        serde_json::from_str(&text).expect("relay sent invalid JSON upstream")
    }

    /// Feed one provider event to the relay.
    pub async fn feed(&self, event: Value) {
        self.events
            .send(event.to_string())
            .await
            .expect("scripted transport gone");
    }
}

struct ScriptedTransport {
    incoming: mpsc::Receiver<String>,
    outgoing: mpsc::Sender<String>,
    open: Arc<AtomicBool>,
    fail_sends: Arc<AtomicBool>,
}

#[async_trait]
impl UpstreamTransport for ScriptedTransport {
    async fn send_text(&mut self, text: String) -> RelayResult<()> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(RelayError::Transport("scripted send failure".into()));
        }
        if !self.open.load(Ordering::SeqCst) {
            return Err(RelayError::Transport("scripted transport closed".into()));
        }
        self.outgoing
            .send(text)
            .await
            .map_err(|_| RelayError::Transport("scripted transport closed".into()))
    }

    async fn recv_text(&mut self) -> Option<RelayResult<String>> {
        match self.incoming.recv().await {
            Some(text) => Some(Ok(text)),
            None => {
                self.open.store(false, Ordering::SeqCst);
                None
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        self.incoming.close();
    }
}

/// A transport for the relay plus the script handle controlling it.
pub fn scripted_pair() -> (Box<dyn UpstreamTransport>, ScriptHandle) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let (sent_tx, sent_rx) = mpsc::channel(64);
    let open = Arc::new(AtomicBool::new(true));
    let fail_sends = Arc::new(AtomicBool::new(false));
    let transport = ScriptedTransport {
        incoming: events_rx,
        outgoing: sent_tx,
        open,
        fail_sends: fail_sends.clone(),
    };
    let handle = ScriptHandle {
        events: events_tx,
        sent: sent_rx,
        fail_sends,
    };
    (Box::new(transport), handle)
}

/// Connector that hands out pre-scripted transports, counting attempts.
pub struct ScriptedConnector {
    transports: StdMutex<VecDeque<Box<dyn UpstreamTransport>>>,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            transports: StdMutex::new(VecDeque::new()),
            attempts: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, transport: Box<dyn UpstreamTransport>) {
        self.transports
            .lock()
            .expect("transports lock")
            .push_back(transport);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamConnector for ScriptedConnector {
    async fn connect(&self, _model: &str) -> RelayResult<Box<dyn UpstreamTransport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.transports
            .lock()
            .expect("transports lock")
            .pop_front()
            .ok_or_else(|| RelayError::ConnectionFailed("mock provider unavailable".into()))
    }
}

/// Poll `cond` until it holds or the deadline passes.
pub async fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let end = Instant::now() + deadline;
    while Instant::now() < end {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
