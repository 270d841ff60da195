//! Upstream provider integration: wire events, connection traits, and the
//! per-session bridge.

pub mod bridge;
pub mod connector;
pub mod events;

pub use bridge::UpstreamBridge;
pub use connector::{UpstreamConnector, UpstreamTransport, WsConnector};
