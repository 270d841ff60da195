//! Client-facing relay WebSocket endpoint.

pub mod handler;
pub mod messages;

pub use handler::relay_handler;
