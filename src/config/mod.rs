//! Server configuration.
//!
//! Loaded from a YAML file when `--config` is given, otherwise from
//! environment variables (after `dotenvy` has read any `.env` file), with
//! sensible defaults everywhere except the upstream API key.

use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{RelayError, RelayResult};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Bind address.
    pub host: String,
    pub port: u16,

    /// Upstream realtime WebSocket URL (without the model query parameter).
    pub upstream_url: String,
    /// Bearer token for the upstream handshake. Optional at load time so the
    /// server can start without it; connecting upstream then fails cleanly.
    pub upstream_api_key: Option<String>,
    /// Model used when a client does not name one.
    pub default_model: String,

    /// Comma-separated CORS origins, or `*`. Unset means same-origin only.
    pub cors_allowed_origins: Option<String>,

    pub connect_timeout_secs: u64,
    pub read_timeout_secs: u64,
    pub heartbeat_interval_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            upstream_url: "wss://api.minimax.io/v1/realtime".to_string(),
            upstream_api_key: None,
            default_model: "speech-02-turbo".to_string(),
            cors_allowed_origins: None,
            connect_timeout_secs: 30,
            read_timeout_secs: 30,
            heartbeat_interval_secs: 15,
        }
    }
}

impl RelayConfig {
    /// Build from environment variables, falling back to defaults.
    pub fn from_env() -> RelayResult<Self> {
        let defaults = Self::default();
        let config = Self {
            host: env_or("RELAY_HOST", defaults.host),
            port: env_parse("RELAY_PORT", defaults.port)?,
            upstream_url: env_or("UPSTREAM_WS_URL", defaults.upstream_url),
            upstream_api_key: std::env::var("UPSTREAM_API_KEY").ok(),
            default_model: env_or("UPSTREAM_DEFAULT_MODEL", defaults.default_model),
            cors_allowed_origins: std::env::var("CORS_ALLOWED_ORIGINS").ok(),
            connect_timeout_secs: env_parse(
                "UPSTREAM_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            )?,
            read_timeout_secs: env_parse("UPSTREAM_READ_TIMEOUT_SECS", defaults.read_timeout_secs)?,
            heartbeat_interval_secs: env_parse(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a YAML file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> RelayResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            RelayError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&text).map_err(|e| {
            RelayError::Configuration(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    fn validate(&self) -> RelayResult<()> {
        if !self.upstream_url.starts_with("ws://") && !self.upstream_url.starts_with("wss://") {
            return Err(RelayError::Configuration(format!(
                "upstream_url must be a ws:// or wss:// URL, got {}",
                self.upstream_url
            )));
        }
        if self.connect_timeout_secs == 0
            || self.read_timeout_secs == 0
            || self.heartbeat_interval_secs == 0
        {
            return Err(RelayError::Configuration(
                "timeouts and the heartbeat interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

fn env_parse<T: FromStr>(key: &str, default: T) -> RelayResult<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| RelayError::Configuration(format!("invalid value for {key}: {raw}"))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RelayConfig::default();
        assert_eq!(config.address(), "0.0.0.0:8080");
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.heartbeat_interval(), Duration::from_secs(15));
        assert!(config.upstream_api_key.is_none());
    }

    #[test]
    fn test_from_file_partial_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "port: 9000\nupstream_api_key: sk-test\ndefault_model: speech-02"
        )
        .unwrap();

        let config = RelayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.upstream_api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.default_model, "speech-02");
        // Untouched fields keep their defaults.
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.read_timeout_secs, 30);
    }

    #[test]
    fn test_from_file_rejects_bad_upstream_url() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "upstream_url: https://not-a-websocket.example").unwrap();
        let err = RelayConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, RelayError::Configuration(_)));
    }

    #[test]
    fn test_from_file_rejects_zero_timeout() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "heartbeat_interval_secs: 0").unwrap();
        assert!(RelayConfig::from_file(file.path()).is_err());
    }
}
