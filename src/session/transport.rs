//! Client transport abstraction.
//!
//! Sessions talk to their client through this trait; the production adapter
//! wraps the mpsc channel drained by the per-connection sender task, and
//! tests substitute an in-memory recorder.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::errors::{RelayError, RelayResult};

/// Frames routed to the per-connection sender task.
#[derive(Debug, Clone)]
pub enum MessageRoute {
    /// A JSON text frame for the client.
    Text(String),
    /// Close the client socket.
    Close,
}

/// A connected client, as the session layer sees it.
#[async_trait]
pub trait ClientTransport: Send + Sync {
    /// Queue one JSON text frame for the client.
    async fn send_text(&self, text: String) -> RelayResult<()>;

    /// Whether the client can still be written to.
    fn is_open(&self) -> bool;

    /// Ask the sender task to close the socket.
    async fn close(&self);
}

/// Production transport: hands frames to the sender task owned by the
/// WebSocket handler.
pub struct ChannelClient {
    tx: mpsc::Sender<MessageRoute>,
}

impl ChannelClient {
    pub fn new(tx: mpsc::Sender<MessageRoute>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ClientTransport for ChannelClient {
    async fn send_text(&self, text: String) -> RelayResult<()> {
        self.tx
            .send(MessageRoute::Text(text))
            .await
            .map_err(|_| RelayError::ClientSendFailure("client channel closed".to_string()))
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn close(&self) {
        let _ = self.tx.send(MessageRoute::Close).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_delivers_to_channel() {
        let (tx, mut rx) = mpsc::channel(8);
        let client = ChannelClient::new(tx);
        client.send_text("{\"type\":\"ping\"}".to_string()).await.unwrap();
        match rx.recv().await {
            Some(MessageRoute::Text(text)) => assert!(text.contains("ping")),
            other => panic!("unexpected route: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_send_fails_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let client = ChannelClient::new(tx);
        assert!(!client.is_open());
        let err = client.send_text("x".to_string()).await.unwrap_err();
        assert!(matches!(err, RelayError::ClientSendFailure(_)));
    }
}
