//! Error types for the relay.

use std::time::Duration;
use thiserror::Error;

/// Errors produced by session, upstream, and audio handling.
///
/// Every variant is session-scoped: a failing session is torn down and the
/// server keeps serving the others.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Upstream connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Upstream connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Upstream connection closed")]
    UpstreamClosed,

    #[error("No upstream connection for this session")]
    NotConnected,

    #[error("Unknown session: {0}")]
    UnknownSession(String),

    #[error("Failed to send to client: {0}")]
    ClientSendFailure(String),

    #[error("Audio integrity error: {0}")]
    AudioIntegrity(String),

    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RelayError::ConnectTimeout(Duration::from_secs(30));
        assert!(err.to_string().contains("30s"));

        let err = RelayError::UnknownSession("abc".to_string());
        assert_eq!(err.to_string(), "Unknown session: abc");
    }

    #[test]
    fn test_serde_error_conversion() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{bad").unwrap_err();
        let err: RelayError = parse_err.into();
        assert!(matches!(err, RelayError::Serialization(_)));
    }
}
