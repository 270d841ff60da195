//! Base64 audio accumulation helpers: cleaning, final validation, and
//! size-safe re-chunking of large payloads.
//!
//! Streaming providers occasionally emit deltas with stray whitespace or
//! broken padding, and a full welcome clip can exceed what a single browser
//! WebSocket frame comfortably carries. Payloads are split on multiple-of-4
//! boundaries so every piece is independently decodable base64.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;

use crate::errors::{RelayError, RelayResult};

/// Largest base64 payload sent to a client in one message.
pub const MAX_CHUNK_CHARS: usize = 800_000;

/// Pause between successive audio chunks so slow clients can drain.
pub const INTER_CHUNK_DELAY: Duration = Duration::from_millis(50);

/// Strip every character outside the standard base64 alphabet.
///
/// Applied to each audio delta before it is appended to the session buffer;
/// padding is normalized once, when the finished buffer is validated.
pub fn clean_base64(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '/' | '='))
        .collect()
}

/// Strip any existing trailing padding and re-pad to a multiple of 4.
fn fix_padding(s: &str) -> String {
    let stripped = s.trim_end_matches('=');
    let mut fixed = stripped.to_string();
    match stripped.len() % 4 {
        0 => {}
        rem => fixed.push_str(&"=".repeat(4 - rem)),
    }
    fixed
}

/// Validate an accumulated buffer before it is sent to a client.
///
/// Tries the buffer as-is, then with normalized padding, then with every
/// non-alphabet character removed. Returns the first variant that decodes;
/// a buffer that survives none of the repairs is never transmitted.
pub fn validate_final(audio: &str) -> RelayResult<String> {
    if BASE64.decode(audio).is_ok() {
        return Ok(audio.to_string());
    }

    let repadded = fix_padding(audio);
    if BASE64.decode(&repadded).is_ok() {
        return Ok(repadded);
    }

    let scrubbed = fix_padding(&clean_base64(audio));
    if BASE64.decode(&scrubbed).is_ok() {
        return Ok(scrubbed);
    }

    Err(RelayError::AudioIntegrity(format!(
        "accumulated audio ({} chars) is not decodable base64",
        audio.len()
    )))
}

/// Delivery plan for a validated audio payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkPlan {
    /// Fits in one message, sent whole.
    Single(String),
    /// Over the threshold: ordered pieces, each a multiple of 4 chars.
    Pieces(Vec<String>),
}

/// Largest multiple of 4 strictly below `max`, so an exactly-at-threshold
/// payload still goes out as a single message. Clamped to 4 so a degenerate
/// threshold cannot produce zero-length pieces.
fn split_len(max: usize) -> usize {
    (max.saturating_sub(1) / 4).max(1) * 4
}

/// Split `audio` for delivery. Payloads of up to `max` chars stay whole;
/// larger ones are cut at multiple-of-4 boundaries so each piece decodes
/// on its own.
pub fn plan_chunks(audio: String, max: usize) -> ChunkPlan {
    if audio.len() <= max {
        return ChunkPlan::Single(audio);
    }

    let piece_len = split_len(max);
    let pieces = audio
        .as_bytes()
        .chunks(piece_len)
        .map(|piece| String::from_utf8_lossy(piece).into_owned())
        .collect();
    ChunkPlan::Pieces(pieces)
}

/// Decode-check every piece of a plan. Pieces are validated up front, before
/// anything is transmitted, so a client never receives a partial clip.
pub fn verify_pieces(pieces: &[String]) -> RelayResult<()> {
    for (index, piece) in pieces.iter().enumerate() {
        if BASE64.decode(piece).is_err() {
            return Err(RelayError::AudioIntegrity(format!(
                "chunk {index} ({} chars) failed base64 validation",
                piece.len()
            )));
        }
    }
    Ok(())
}
