//! Upstream realtime protocol events.
//!
//! The provider speaks an OpenAI-realtime-shaped protocol: JSON text frames
//! tagged by a dotted `type` field. Requests model the small subset the relay
//! sends; inbound events the relay does not recognize are preserved verbatim
//! as [`UpstreamEvent::Unknown`] so they can be passed through to clients.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events sent to the upstream provider.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum UpstreamRequest {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionConfig },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate { response: ResponseConfig },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

/// Session-level options sent with `session.update`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice: Option<String>,
}

/// A conversation turn pushed with `conversation.item.create`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

impl ConversationItem {
    /// A user text turn.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart::InputText { text: text.into() }],
        }
    }

    /// A user audio turn carrying base64 PCM.
    pub fn user_audio(audio: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart::InputAudio {
                audio: audio.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    InputText { text: String },
    InputAudio { audio: String },
}

/// Options for `response.create`.
#[derive(Debug, Clone, Serialize)]
pub struct ResponseConfig {
    pub modalities: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            modalities: vec!["text".to_string(), "audio".to_string()],
            instructions: None,
        }
    }
}

/// Events received from the upstream provider.
///
/// Field-level `default`s keep parsing tolerant: providers differ in which
/// optional fields they populate, and a recognized `type` with a missing
/// payload field should not turn into a passthrough.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum UpstreamEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Value,
    },

    #[serde(rename = "response.text.delta")]
    TextDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    TextDone {
        #[serde(default)]
        text: String,
    },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone {
        #[serde(default)]
        audio: Option<String>,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        transcript: String,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: ResponseSummary,
    },

    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        error: ErrorDetail,
    },

    /// Any event the relay does not model, kept verbatim for passthrough.
    #[serde(skip)]
    Unknown(Value),
}

impl UpstreamEvent {
    /// Parse a text frame from the upstream socket.
    ///
    /// Frames that are not JSON at all are an error; JSON with an
    /// unrecognized `type` becomes [`UpstreamEvent::Unknown`].
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(text)?;
        match Self::deserialize(&value) {
            Ok(event) => Ok(event),
            Err(_) => Ok(UpstreamEvent::Unknown(value)),
        }
    }
}

/// The `response` payload of `response.done`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseSummary {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub output: Vec<OutputItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputItem {
    #[serde(rename = "type", default)]
    pub item_type: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Vec<OutputContent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputContent {
    #[serde(rename = "type", default)]
    pub content_type: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub audio: Option<String>,
    #[serde(default)]
    pub transcript: Option<String>,
}

impl ResponseSummary {
    /// Extract the final assistant text and audio from the output items.
    ///
    /// Walks `output[]` for assistant message items; `text` parts provide the
    /// text, `audio` parts provide the audio and, failing a text part, their
    /// transcript stands in for the text.
    pub fn final_output(&self) -> (Option<String>, Option<String>) {
        let mut text = None;
        let mut audio = None;
        for item in &self.output {
            if item.item_type != "message" || item.role.as_deref() != Some("assistant") {
                continue;
            }
            for part in &item.content {
                match part.content_type.as_str() {
                    "text" => {
                        if text.is_none() {
                            text = part.text.clone();
                        }
                    }
                    "audio" => {
                        if audio.is_none() {
                            audio = part.audio.clone();
                        }
                        if text.is_none() {
                            text = part.transcript.clone();
                        }
                    }
                    _ => {}
                }
            }
        }
        (text, audio)
    }
}

/// The `error` payload of an upstream `error` event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_serialize_conversation_item_create() {
        let request = UpstreamRequest::ConversationItemCreate {
            item: ConversationItem::user_text("Hello there"),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "conversation.item.create");
        assert_eq!(value["item"]["type"], "message");
        assert_eq!(value["item"]["role"], "user");
        assert_eq!(value["item"]["content"][0]["type"], "input_text");
        assert_eq!(value["item"]["content"][0]["text"], "Hello there");
    }

    #[test]
    fn test_serialize_response_create_defaults() {
        let request = UpstreamRequest::ResponseCreate {
            response: ResponseConfig::default(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["type"], "response.create");
        assert_eq!(value["response"]["modalities"], json!(["text", "audio"]));
        assert!(value["response"].get("instructions").is_none());
    }

    #[test]
    fn test_parse_audio_delta() {
        let event =
            UpstreamEvent::parse(r#"{"type":"response.audio.delta","delta":"QUJD"}"#).unwrap();
        match event {
            UpstreamEvent::AudioDelta { delta } => assert_eq!(delta, "QUJD"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_tolerates_missing_fields() {
        let event = UpstreamEvent::parse(r#"{"type":"response.text.delta"}"#).unwrap();
        assert!(matches!(event, UpstreamEvent::TextDelta { delta } if delta.is_empty()));
    }

    #[test]
    fn test_parse_unknown_type_preserved() {
        let event =
            UpstreamEvent::parse(r#"{"type":"rate_limits.updated","rate_limits":[]}"#).unwrap();
        match event {
            UpstreamEvent::Unknown(value) => {
                assert_eq!(value["type"], "rate_limits.updated");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(UpstreamEvent::parse("not json").is_err());
    }

    #[test]
    fn test_final_output_extraction() {
        let event = UpstreamEvent::parse(
            r#"{
                "type": "response.done",
                "response": {
                    "id": "resp_1",
                    "status": "completed",
                    "output": [
                        {"type": "function_call", "name": "noop"},
                        {
                            "type": "message",
                            "role": "assistant",
                            "content": [
                                {"type": "audio", "audio": "QUJD", "transcript": "Hi!"}
                            ]
                        }
                    ]
                }
            }"#,
        )
        .unwrap();
        let UpstreamEvent::ResponseDone { response } = event else {
            panic!("expected response.done");
        };
        let (text, audio) = response.final_output();
        assert_eq!(text.as_deref(), Some("Hi!"));
        assert_eq!(audio.as_deref(), Some("QUJD"));
    }

    #[test]
    fn test_error_event_detail() {
        let event = UpstreamEvent::parse(
            r#"{"type":"error","error":{"code":"session_expired","message":"Session expired"}}"#,
        )
        .unwrap();
        let UpstreamEvent::Error { error } = event else {
            panic!("expected error event");
        };
        assert_eq!(error.code.as_deref(), Some("session_expired"));
        assert_eq!(error.message, "Session expired");
    }
}
