//! Domain entities for vidcast.
//!
//! Pure business rules with no I/O: the negotiation state machine that each
//! browser session follows, and the identifier that names a session.

/// Offer/answer negotiation state machine.
///
/// See [`negotiation::Negotiation`] for the main type.
pub mod negotiation;

/// Session identity.
pub mod session_id;
