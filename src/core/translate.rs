//! Translation of upstream events into client-facing actions.
//!
//! The translator is a pure dispatch over `(phase, event)`: it owns no I/O
//! and no locks, returning the actions to perform and the next phase. The
//! welcome flow is a first-class phase here rather than a boolean flag, so
//! suppression and buffering rules are visible in one match.

use serde_json::json;

use crate::core::audio;
use crate::core::upstream::events::UpstreamEvent;
use crate::core::welcome;
use crate::handlers::relay::messages::{OutgoingMessage, RelayPayload};

/// Where a session stands relative to its upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No upstream connection.
    #[default]
    Idle,
    /// Upstream socket open, waiting for `session.created`.
    AwaitingUpstream,
    /// Upstream ready; events flow through to the client.
    Streaming,
    /// Welcome generation in progress; deltas are suppressed or buffered.
    GeneratingWelcome,
}

/// What the connection task should do with a translated event.
#[derive(Debug, Clone)]
pub enum RelayAction {
    /// Send a top-level message to the client.
    Notify(OutgoingMessage),
    /// Send an `upstream_response` envelope to the client.
    Forward(RelayPayload),
    /// Append cleaned base64 to the welcome audio buffer.
    BufferAudio(String),
    /// Validate and deliver the welcome audio buffer.
    FlushWelcomeAudio,
    /// Reset the buffer and send the greeting turn upstream.
    StartWelcome,
}

/// Map one upstream event to client-facing actions and the next phase.
pub fn translate(phase: SessionPhase, event: UpstreamEvent) -> (Vec<RelayAction>, SessionPhase) {
    use RelayAction::*;
    use SessionPhase::*;

    match (phase, event) {
        // Upstream errors always surface, whatever the phase.
        (p, UpstreamEvent::Error { error }) => {
            let message = match error.code {
                Some(code) => format!("Upstream error ({code}): {}", error.message),
                None => format!("Upstream error: {}", error.message),
            };
            (vec![Notify(OutgoingMessage::error(message))], p)
        }

        // Session established: kick off the welcome flow exactly once per
        // upstream connection.
        (_, UpstreamEvent::SessionCreated { .. }) => (
            vec![
                Notify(OutgoingMessage::WelcomeGenerating {
                    message: welcome::GENERATING_MESSAGE.to_string(),
                }),
                StartWelcome,
            ],
            GeneratingWelcome,
        ),

        // While the welcome is generating, text deltas are suppressed (the
        // transcript arrives whole via welcome_text_complete) and audio
        // deltas accumulate server-side.
        (GeneratingWelcome, UpstreamEvent::TextDelta { .. }) => (vec![], GeneratingWelcome),
        (GeneratingWelcome, UpstreamEvent::TextDone { .. }) => (vec![], GeneratingWelcome),
        (GeneratingWelcome, UpstreamEvent::AudioDelta { delta }) => (
            vec![BufferAudio(audio::clean_base64(&delta))],
            GeneratingWelcome,
        ),
        (GeneratingWelcome, UpstreamEvent::AudioDone { .. }) => {
            (vec![FlushWelcomeAudio], Streaming)
        }
        (GeneratingWelcome, UpstreamEvent::AudioTranscriptDone { transcript }) => (
            vec![Notify(OutgoingMessage::WelcomeTextComplete { text: transcript })],
            GeneratingWelcome,
        ),
        (GeneratingWelcome, UpstreamEvent::Unknown(_)) => (vec![], GeneratingWelcome),

        // Normal streaming: translate into the client payload vocabulary.
        (p, UpstreamEvent::TextDelta { delta }) => {
            (vec![Forward(RelayPayload::TextDelta { text: delta })], p)
        }
        (p, UpstreamEvent::TextDone { text }) => {
            (vec![Forward(RelayPayload::TextComplete { text })], p)
        }
        (p, UpstreamEvent::AudioDelta { delta }) => {
            (vec![Forward(RelayPayload::AudioDelta { audio: delta })], p)
        }
        (p, UpstreamEvent::AudioDone { audio }) => {
            (vec![Forward(RelayPayload::AudioComplete { audio })], p)
        }
        (p, UpstreamEvent::AudioTranscriptDone { transcript }) => (
            vec![Forward(RelayPayload::Passthrough(json!({
                "type": "response.audio_transcript.done",
                "transcript": transcript,
            })))],
            p,
        ),

        // response.done closes the turn in every phase.
        (p, UpstreamEvent::ResponseDone { response }) => {
            let (text, audio) = response.final_output();
            (
                vec![Forward(RelayPayload::ResponseComplete { text, audio })],
                p,
            )
        }

        (p, UpstreamEvent::Unknown(value)) => (vec![Forward(RelayPayload::Passthrough(value))], p),
    }
}
