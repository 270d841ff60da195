//! Capability traits for the upstream connection plus the production
//! tokio-tungstenite adapter.
//!
//! The bridge and its tests depend only on the traits; the WebSocket adapter
//! here is the single place that knows about handshakes, bearer auth, and
//! ping/pong bookkeeping.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::debug;
use url::Url;

use crate::errors::{RelayError, RelayResult};

/// An open upstream socket, owned by exactly one connection task.
#[async_trait]
pub trait UpstreamTransport: Send {
    /// Send one JSON text frame.
    async fn send_text(&mut self, text: String) -> RelayResult<()>;

    /// Receive the next JSON text frame. `None` means the connection ended.
    async fn recv_text(&mut self) -> Option<RelayResult<String>>;

    /// Best-effort liveness, used by the read-timeout re-check.
    fn is_open(&self) -> bool;

    async fn close(&mut self);
}

/// Opens authenticated upstream connections for a given model.
#[async_trait]
pub trait UpstreamConnector: Send + Sync {
    async fn connect(&self, model: &str) -> RelayResult<Box<dyn UpstreamTransport>>;
}

/// Production connector speaking WebSocket with bearer authentication.
pub struct WsConnector {
    url: String,
    api_key: Option<String>,
}

impl WsConnector {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key,
        }
    }

    /// Build the handshake request: model as a query parameter, bearer auth,
    /// and the WebSocket upgrade headers the handshake needs.
    fn build_request(&self, model: &str) -> RelayResult<http::Request<()>> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            RelayError::Configuration("upstream API key is not configured".to_string())
        })?;

        let mut url = Url::parse(&self.url)
            .map_err(|e| RelayError::ConnectionFailed(format!("invalid upstream URL: {e}")))?;
        url.query_pairs_mut().append_pair("model", model);

        let host = url
            .host_str()
            .ok_or_else(|| {
                RelayError::ConnectionFailed("upstream URL has no host".to_string())
            })?
            .to_string();

        http::Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Host", host)
            .header("Upgrade", "websocket")
            .header("Connection", "Upgrade")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Sec-WebSocket-Version", "13")
            .body(())
            .map_err(|e| RelayError::ConnectionFailed(e.to_string()))
    }
}

#[async_trait]
impl UpstreamConnector for WsConnector {
    async fn connect(&self, model: &str) -> RelayResult<Box<dyn UpstreamTransport>> {
        let request = self.build_request(model)?;
        let (stream, response) = connect_async(request)
            .await
            .map_err(|e| RelayError::ConnectionFailed(e.to_string()))?;
        debug!(status = %response.status(), model = %model, "upstream websocket established");
        Ok(Box::new(WsTransport { stream, open: true }))
    }
}

struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    open: bool,
}

#[async_trait]
impl UpstreamTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> RelayResult<()> {
        match self.stream.send(Message::Text(text.into())).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.open = false;
                Err(RelayError::Transport(e.to_string()))
            }
        }
    }

    async fn recv_text(&mut self) -> Option<RelayResult<String>> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Some(Ok(text.to_string())),
                Some(Ok(Message::Ping(payload))) => {
                    if let Err(e) = self.stream.send(Message::Pong(payload)).await {
                        self.open = false;
                        return Some(Err(RelayError::Transport(e.to_string())));
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    self.open = false;
                    return None;
                }
                // Binary, pong, and raw frames carry nothing for us.
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    self.open = false;
                    return Some(Err(RelayError::Transport(e.to_string())));
                }
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn close(&mut self) {
        self.open = false;
        let _ = self.stream.close(None).await;
    }
}
