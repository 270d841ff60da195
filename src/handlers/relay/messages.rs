//! Client-facing wire protocol for the relay WebSocket endpoint.
//!
//! Clients speak a deliberately small JSON protocol tagged by `type`; the
//! richer upstream protocol is translated into `upstream_response` envelopes
//! or dedicated welcome messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Upper bound on a single inbound text frame. Audio messages carry base64
/// PCM, so this needs headroom over plain chat text.
pub const MAX_INBOUND_FRAME_BYTES: usize = 10 * 1024 * 1024;

/// Messages clients send to the relay.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    /// Open the upstream connection eagerly.
    ConnectUpstream {
        #[serde(default)]
        model: Option<String>,
    },

    /// A user chat turn; connects upstream lazily if needed.
    UserMessage { text: String },

    /// A user audio turn as base64 PCM.
    AudioMessage {
        audio_data: String,
        #[serde(default = "default_audio_format")]
        format: String,
        #[serde(default = "default_sample_rate")]
        sample_rate: u32,
        #[serde(default = "default_channels")]
        channels: u16,
    },

    /// A raw upstream event, forwarded verbatim.
    SendToUpstream { message: Value },

    /// Close the upstream connection; the client session stays alive.
    DisconnectUpstream,
}

fn default_audio_format() -> String {
    "pcm16".to_string()
}

fn default_sample_rate() -> u32 {
    24_000
}

fn default_channels() -> u16 {
    1
}

/// Messages the relay sends to clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutgoingMessage {
    ConnectionStatus {
        connected: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Heartbeat with milliseconds since the Unix epoch.
    Ping { timestamp: u64 },

    Error { message: String },

    /// Welcome generation started; audio and text will follow.
    WelcomeGenerating { message: String },

    WelcomeTextComplete { text: String },

    WelcomeAudioChunk {
        chunk_index: usize,
        total_chunks: usize,
        audio: String,
    },

    /// End of welcome audio. Carries the whole clip when it fit in one
    /// message, or no payload as the terminator of a chunked delivery.
    WelcomeAudioComplete {
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
    },

    /// A translated (or passed-through) upstream event.
    UpstreamResponse { data: RelayPayload },
}

impl OutgoingMessage {
    pub fn error(message: impl Into<String>) -> Self {
        OutgoingMessage::Error {
            message: message.into(),
        }
    }

    pub fn status(connected: bool, model: Option<String>, message: Option<String>) -> Self {
        OutgoingMessage::ConnectionStatus {
            connected,
            model,
            message,
        }
    }
}

/// The `data` payload of an `upstream_response` envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayPayload {
    TextDelta { text: String },

    TextComplete { text: String },

    AudioDelta { audio: String },

    AudioComplete {
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
    },

    ResponseComplete {
        #[serde(skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
    },

    /// An upstream event forwarded verbatim, original `type` tag included.
    #[serde(untagged)]
    Passthrough(Value),
}
