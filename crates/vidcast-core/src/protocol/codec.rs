//! JSON codec for signaling text frames.
//!
//! Wire format: one UTF-8 JSON object per WebSocket text frame, with exactly
//! one recognised top-level key (`"sdp"` or `"ice"`).
//!
//! Decoding is deliberately lenient at the envelope level and strict inside
//! the payload:
//!
//! - an object with neither `"sdp"` nor `"ice"` decodes to `Ok(None)` and is
//!   skipped by the caller;
//! - anything that is not a JSON object, or a recognised key whose body does
//!   not match the expected shape, is a [`ProtocolError`].

use serde_json::{Map, Value};
use thiserror::Error;

use crate::protocol::messages::{IceCandidate, SessionDescription, SignalingMessage};

/// Errors that can occur while encoding or decoding a signaling frame.
#[derive(Debug, Error, PartialEq)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    /// The frame is valid JSON but not an object (e.g. an array or a string).
    #[error("frame is not a JSON object")]
    NotAnObject,

    /// The frame carries both `"sdp"` and `"ice"`.
    #[error("frame carries both \"sdp\" and \"ice\"")]
    AmbiguousFrame,

    /// The `"sdp"` body is not `{"type": "offer"|"answer", "sdp": "<text>"}`.
    #[error("malformed session description: {0}")]
    MalformedDescription(String),

    /// The `"ice"` body is not `{"candidate": "<text>", "sdpMLineIndex": <n>}`.
    #[error("malformed ICE candidate: {0}")]
    MalformedCandidate(String),

    /// The message could not be serialized.
    #[error("failed to encode frame: {0}")]
    Encode(String),
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`SignalingMessage`] into a JSON text frame.
///
/// # Errors
///
/// Returns [`ProtocolError::Encode`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use vidcast_core::protocol::{encode_frame, decode_frame};
/// use vidcast_core::protocol::messages::{IceCandidate, SignalingMessage};
///
/// let msg = SignalingMessage::Ice(IceCandidate::new(0, "candidate:1 1 udp 1 10.0.0.1 9 typ host"));
/// let frame = encode_frame(&msg).unwrap();
/// assert_eq!(decode_frame(&frame).unwrap(), Some(msg));
/// ```
pub fn encode_frame(msg: &SignalingMessage) -> Result<String, ProtocolError> {
    serde_json::to_string(msg).map_err(|e| ProtocolError::Encode(e.to_string()))
}

/// Decodes one text frame received from the browser.
///
/// Returns `Ok(None)` for an object without a recognised key; such frames
/// are ignored without error.
///
/// # Errors
///
/// Returns [`ProtocolError`] if the frame is not a JSON object or a
/// recognised payload is malformed.
pub fn decode_frame(frame: &str) -> Result<Option<SignalingMessage>, ProtocolError> {
    let value: Value =
        serde_json::from_str(frame).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

    let Value::Object(mut fields) = value else {
        return Err(ProtocolError::NotAnObject);
    };

    match (fields.remove("sdp"), fields.remove("ice")) {
        (Some(_), Some(_)) => Err(ProtocolError::AmbiguousFrame),
        (Some(sdp), None) => decode_description(sdp).map(Some),
        (None, Some(ice)) => decode_candidate(ice).map(Some),
        (None, None) => {
            tracing::trace!("ignoring frame with keys {:?}", key_list(&fields));
            Ok(None)
        }
    }
}

// ── Payload decoders ──────────────────────────────────────────────────────────

fn decode_description(body: Value) -> Result<SignalingMessage, ProtocolError> {
    serde_json::from_value::<SessionDescription>(body)
        .map(SignalingMessage::Sdp)
        .map_err(|e| ProtocolError::MalformedDescription(e.to_string()))
}

fn decode_candidate(body: Value) -> Result<SignalingMessage, ProtocolError> {
    serde_json::from_value::<IceCandidate>(body)
        .map(SignalingMessage::Ice)
        .map_err(|e| ProtocolError::MalformedCandidate(e.to_string()))
}

fn key_list(fields: &Map<String, Value>) -> Vec<&str> {
    fields.keys().map(String::as_str).collect()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
