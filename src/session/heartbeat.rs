//! Per-session heartbeat: a periodic ping that doubles as a client
//! liveness probe.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::handlers::relay::messages::OutgoingMessage;
use crate::session::SessionRegistry;

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Spawn the heartbeat loop for one session.
///
/// Every interval: if the client is gone, disconnect the session; otherwise
/// send a `ping`. Any failure just ends the loop, since a failed registry
/// send has already torn the session down.
pub(crate) fn spawn(
    registry: SessionRegistry,
    session_id: String,
    cancel: CancellationToken,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let Some(session) = registry.get(&session_id) else {
                        break;
                    };
                    if !session.client.is_open() {
                        debug!(client_id = %session_id, "client gone, reaping session");
                        registry.disconnect(&session_id).await;
                        break;
                    }
                    let ping = OutgoingMessage::Ping {
                        timestamp: epoch_millis(),
                    };
                    if !registry.send(&ping, &session_id).await {
                        break;
                    }
                }
            }
        }
        debug!(client_id = %session_id, "heartbeat stopped");
    })
}
