//! Signaling message types exchanged between the server and a browser.
//!
//! Every frame on the signaling WebSocket is a JSON object with exactly one
//! top-level key that identifies the variant:
//!
//! ```json
//! {"sdp":{"type":"offer","sdp":"v=0\r\n..."}}
//! {"ice":{"candidate":"candidate:1 1 UDP 2122252543 192.168.1.5 50000 typ host","sdpMLineIndex":0}}
//! ```
//!
//! The payloads are opaque: the server never looks inside the SDP text or the
//! candidate line.  It only carries them between the browser and the media
//! engine, which does its own validation.

use serde::{Deserialize, Serialize};

/// Which half of the offer/answer exchange a description belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Produced by the server's media engine.
    Offer,
    /// Produced by the browser in reply to an offer.
    Answer,
}

impl SdpType {
    /// The lowercase wire name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            SdpType::Offer => "offer",
            SdpType::Answer => "answer",
        }
    }
}

impl std::fmt::Display for SdpType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session description: `{"type": "offer"|"answer", "sdp": "<text>"}`.
///
/// Immutable once constructed; the fields are private so a description is
/// only ever created whole.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    sdp_type: SdpType,
    sdp: String,
}

impl SessionDescription {
    /// Creates a description of the given kind.
    pub fn new(sdp_type: SdpType, sdp: impl Into<String>) -> Self {
        Self {
            sdp_type,
            sdp: sdp.into(),
        }
    }

    /// Creates an offer description.
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Offer, sdp)
    }

    /// Creates an answer description.
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self::new(SdpType::Answer, sdp)
    }

    /// Offer or answer.
    pub fn sdp_type(&self) -> SdpType {
        self.sdp_type
    }

    /// The opaque session-description text.
    pub fn sdp(&self) -> &str {
        &self.sdp
    }
}

/// One ICE candidate: `{"candidate": "<text>", "sdpMLineIndex": <n>}`.
///
/// Browsers serialise the whole `RTCIceCandidate` object, so inbound
/// candidates usually also carry `sdpMid` and `usernameFragment`.  Those
/// extra fields are accepted and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    candidate: String,
    #[serde(rename = "sdpMLineIndex")]
    sdp_mline_index: u16,
}

impl IceCandidate {
    /// Creates a candidate for the media line at `sdp_mline_index`.
    pub fn new(sdp_mline_index: u16, candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mline_index,
        }
    }

    /// The opaque `candidate:...` line.
    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    /// Index of the SDP media line the candidate belongs to.
    pub fn sdp_mline_index(&self) -> u16 {
        self.sdp_mline_index
    }
}

/// All messages that can travel over the signaling channel, in either
/// direction.
///
/// Serialises as an externally tagged object, which is exactly the wire
/// shape: `{"sdp": {...}}` or `{"ice": {...}}`.  Decoding goes through
/// [`crate::protocol::codec::decode_frame`] instead of `Deserialize` because
/// frames with unknown keys must be skipped rather than rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalingMessage {
    /// A session description (offer from the server, answer from the browser).
    Sdp(SessionDescription),
    /// A connectivity candidate.
    Ice(IceCandidate),
}

impl SignalingMessage {
    /// Returns a short name for the variant.
    ///
    /// Used in log lines so that multi-kilobyte SDP bodies are not dumped at
    /// `debug` level.
    pub fn kind(&self) -> &'static str {
        match self {
            SignalingMessage::Sdp(desc) => match desc.sdp_type() {
                SdpType::Offer => "sdp/offer",
                SdpType::Answer => "sdp/answer",
            },
            SignalingMessage::Ice(_) => "ice",
        }
    }
}

impl From<SessionDescription> for SignalingMessage {
    fn from(desc: SessionDescription) -> Self {
        SignalingMessage::Sdp(desc)
    }
}

impl From<IceCandidate> for SignalingMessage {
    fn from(candidate: IceCandidate) -> Self {
        SignalingMessage::Ice(candidate)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
