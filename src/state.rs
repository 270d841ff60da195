//! Shared application state.

use std::sync::Arc;

use crate::config::RelayConfig;
use crate::core::upstream::{UpstreamBridge, UpstreamConnector, WsConnector};
use crate::session::SessionRegistry;

/// Everything the handlers need, injected via axum `State`.
pub struct AppState {
    pub config: RelayConfig,
    pub registry: SessionRegistry,
    pub bridge: UpstreamBridge,
}

impl AppState {
    /// Production state with the WebSocket connector.
    pub fn new(config: RelayConfig) -> Arc<Self> {
        let connector = Arc::new(WsConnector::new(
            config.upstream_url.clone(),
            config.upstream_api_key.clone(),
        ));
        Self::with_connector(config, connector)
    }

    /// State with an injected connector; tests substitute mocks here.
    pub fn with_connector(config: RelayConfig, connector: Arc<dyn UpstreamConnector>) -> Arc<Self> {
        let registry = SessionRegistry::new(config.heartbeat_interval());
        let bridge = UpstreamBridge::new(
            connector,
            registry.clone(),
            config.default_model.clone(),
            config.connect_timeout(),
            config.read_timeout(),
        );
        Arc::new(Self {
            config,
            registry,
            bridge,
        })
    }
}
