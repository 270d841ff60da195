//! Relay WebSocket routes.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use crate::handlers::relay::relay_handler;
use crate::state::AppState;

/// Router for the realtime chat WebSocket endpoint.
pub fn create_relay_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/realtime-chat", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
