//! Plain HTTP handlers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use serde_json::{Value, json};

use crate::state::AppState;

/// Health check with the current session count.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "realtime-relay",
        "version": env!("CARGO_PKG_VERSION"),
        "active_sessions": state.registry.len(),
    }))
}
