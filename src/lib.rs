//! Realtime relay: bridges browser chat sessions to an upstream streaming
//! speech/text provider over WebSocket.
//!
//! Clients speak a small JSON protocol (`connect_upstream`, `user_message`,
//! `audio_message`, ...); the relay manages one authenticated upstream
//! connection per session, translates the provider's event stream back into
//! client messages, generates a spoken welcome on connect, and re-chunks
//! large base64 audio payloads for delivery.

pub mod config;
pub mod core;
pub mod errors;
pub mod handlers;
pub mod routes;
pub mod session;
pub mod state;

pub use config::RelayConfig;
pub use errors::{RelayError, RelayResult};
pub use state::AppState;
