//! # vidcast-core
//!
//! Shared library for vidcast containing the signaling wire protocol and the
//! negotiation state machine that every browser session walks through.
//!
//! This crate has zero dependencies on sockets, async runtimes, or the media
//! engine.  Everything in it can be unit-tested with plain `#[test]`s.
//!
//! # Architecture overview
//!
//! vidcast streams video from a server-side media source to a browser over
//! WebRTC.  Before media can flow, both sides exchange *signaling* messages
//! over a WebSocket: one session description each (offer from the server,
//! answer from the browser) and any number of ICE candidates.
//!
//! - **`protocol`** – The JSON text frames carried over the WebSocket and the
//!   codec that turns them into a closed [`SignalingMessage`] enum.
//!
//! - **`domain`** – The [`Negotiation`] state machine
//!   (`Idle → OfferPending → Negotiating → Established → Closed`) and the
//!   [`SessionId`] used to identify each browser connection.

pub mod domain;
pub mod protocol;

pub use domain::negotiation::{Negotiation, NegotiationError, NegotiationPhase};
pub use domain::session_id::SessionId;
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::messages::{IceCandidate, SdpType, SessionDescription, SignalingMessage};
