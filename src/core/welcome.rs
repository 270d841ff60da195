//! Welcome flow: greeting request and delivery of the accumulated clip.
//!
//! Runs exactly once per upstream connection, right after `session.created`.
//! The greeting goes upstream as an ordinary user turn so the provider
//! responds with streamed text and audio; the relay buffers the audio and
//! delivers it whole (or chunked) when the stream finishes.

use tokio::time::sleep;
use tracing::{info, warn};

use crate::core::audio::{self, ChunkPlan, INTER_CHUNK_DELAY, MAX_CHUNK_CHARS};
use crate::core::upstream::events::{ConversationItem, ResponseConfig, UpstreamRequest};
use crate::handlers::relay::messages::OutgoingMessage;
use crate::session::SessionRegistry;

/// Status text shown to clients while the welcome is being generated.
pub const GENERATING_MESSAGE: &str = "Generating welcome message...";

/// The greeting turn sent upstream on behalf of the user.
pub const GREETING_PROMPT: &str =
    "Hello! Please greet me warmly in one or two sentences and ask how you can help today.";

/// The two upstream requests that start the welcome: the greeting turn and a
/// response request for text plus audio.
pub fn greeting_requests() -> [UpstreamRequest; 2] {
    [
        UpstreamRequest::ConversationItemCreate {
            item: ConversationItem::user_text(GREETING_PROMPT),
        },
        UpstreamRequest::ResponseCreate {
            response: ResponseConfig::default(),
        },
    ]
}

/// Validate and deliver the accumulated welcome audio to one client.
///
/// Corrupt audio is never transmitted: the buffer is repaired or rejected
/// first, and a chunked delivery is decode-checked piece by piece before the
/// first chunk goes out. A chunked delivery ends with a payload-less
/// `welcome_audio_complete` sentinel.
pub async fn deliver_audio(registry: &SessionRegistry, session_id: &str, buffer: String) {
    if buffer.is_empty() {
        registry
            .send(&OutgoingMessage::WelcomeAudioComplete { audio: None }, session_id)
            .await;
        return;
    }

    let validated = match audio::validate_final(&buffer) {
        Ok(validated) => validated,
        Err(err) => {
            warn!(client_id = %session_id, error = %err, "discarding welcome audio");
            registry
                .send(
                    &OutgoingMessage::error("Welcome audio failed validation and was discarded"),
                    session_id,
                )
                .await;
            return;
        }
    };

    match audio::plan_chunks(validated, MAX_CHUNK_CHARS) {
        ChunkPlan::Single(clip) => {
            info!(client_id = %session_id, chars = clip.len(), "sending welcome audio");
            registry
                .send(
                    &OutgoingMessage::WelcomeAudioComplete { audio: Some(clip) },
                    session_id,
                )
                .await;
        }
        ChunkPlan::Pieces(pieces) => {
            if let Err(err) = audio::verify_pieces(&pieces) {
                warn!(client_id = %session_id, error = %err, "discarding welcome audio");
                registry
                    .send(
                        &OutgoingMessage::error(
                            "Welcome audio failed validation and was discarded",
                        ),
                        session_id,
                    )
                    .await;
                return;
            }

            let total_chunks = pieces.len();
            info!(
                client_id = %session_id,
                chunks = total_chunks,
                "sending welcome audio in chunks"
            );
            for (chunk_index, piece) in pieces.into_iter().enumerate() {
                let chunk = OutgoingMessage::WelcomeAudioChunk {
                    chunk_index,
                    total_chunks,
                    audio: piece,
                };
                if !registry.send(&chunk, session_id).await {
                    return;
                }
                sleep(INTER_CHUNK_DELAY).await;
            }
            registry
                .send(&OutgoingMessage::WelcomeAudioComplete { audio: None }, session_id)
                .await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_requests_shape() {
        let [item, response] = greeting_requests();
        let item = serde_json::to_value(&item).unwrap();
        assert_eq!(item["type"], "conversation.item.create");
        assert_eq!(item["item"]["role"], "user");
        assert_eq!(item["item"]["content"][0]["text"], GREETING_PROMPT);

        let response = serde_json::to_value(&response).unwrap();
        assert_eq!(response["type"], "response.create");
        assert_eq!(
            response["response"]["modalities"],
            serde_json::json!(["text", "audio"])
        );
    }
}
