//! Offer/answer negotiation state machine.
//!
//! Each browser session walks through these phases:
//!
//! ```text
//!   Idle ──NegotiationNeeded──▶ OfferPending ──offer sent──▶ Negotiating
//!                                                               │
//!                                                         answer received
//!                                                               ▼
//!                                                          Established
//!
//!   any phase ──channel closed / fatal error / shutdown──▶ Closed
//! ```
//!
//! [`Negotiation`] only decides whether a transition is legal.  It never
//! talks to the media engine or the network; the session orchestrator asks
//! it first and then performs the side effect.
//!
//! ICE candidates do not move the machine.  They are legal in every phase
//! except `Closed`, including before any description has been exchanged.

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::protocol::messages::SdpType;

/// The phase a session's negotiation is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NegotiationPhase {
    /// Media session built, no offer requested yet.
    Idle,
    /// The engine asked for negotiation; the offer is being produced.
    OfferPending,
    /// Local offer sent to the browser; waiting for its answer.
    Negotiating,
    /// Remote answer applied.  Candidate exchange may continue indefinitely.
    Established,
    /// Terminal.  No further engine calls are issued.
    Closed,
}

impl NegotiationPhase {
    /// Short lowercase name for log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationPhase::Idle => "idle",
            NegotiationPhase::OfferPending => "offer-pending",
            NegotiationPhase::Negotiating => "negotiating",
            NegotiationPhase::Established => "established",
            NegotiationPhase::Closed => "closed",
        }
    }
}

impl fmt::Display for NegotiationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A transition that is not legal in the current phase.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NegotiationError {
    /// `NegotiationNeeded` arrived after an offer was already requested.
    #[error("negotiation requested while {phase}")]
    UnexpectedNegotiationNeeded { phase: NegotiationPhase },

    /// The offer finished after the phase moved on (only possible once closed).
    #[error("offer completed while {phase}")]
    UnexpectedOffer { phase: NegotiationPhase },

    /// A remote description arrived that this phase cannot accept.
    #[error("unexpected remote {kind} while {phase}")]
    UnexpectedDescription {
        kind: SdpType,
        phase: NegotiationPhase,
    },

    /// The session is closed.
    #[error("session is closed")]
    Closed,
}

/// Negotiation state of a single session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Negotiation {
    phase: NegotiationPhase,
}

impl Negotiation {
    /// Starts a negotiation in [`NegotiationPhase::Idle`].
    pub fn new() -> Self {
        Self {
            phase: NegotiationPhase::Idle,
        }
    }

    /// The current phase.
    pub fn phase(&self) -> NegotiationPhase {
        self.phase
    }

    /// `true` once [`Negotiation::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.phase == NegotiationPhase::Closed
    }

    /// `Idle → OfferPending`, on the engine's `NegotiationNeeded`.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Closed`] when closed, otherwise
    /// [`NegotiationError::UnexpectedNegotiationNeeded`] outside `Idle`.
    pub fn request_offer(&mut self) -> Result<(), NegotiationError> {
        match self.phase {
            NegotiationPhase::Idle => {
                self.phase = NegotiationPhase::OfferPending;
                Ok(())
            }
            NegotiationPhase::Closed => Err(NegotiationError::Closed),
            phase => Err(NegotiationError::UnexpectedNegotiationNeeded { phase }),
        }
    }

    /// `OfferPending → Negotiating`, once the offer frame is on the wire.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Closed`] when closed, otherwise
    /// [`NegotiationError::UnexpectedOffer`] outside `OfferPending`.
    pub fn offer_sent(&mut self) -> Result<(), NegotiationError> {
        match self.phase {
            NegotiationPhase::OfferPending => {
                self.phase = NegotiationPhase::Negotiating;
                Ok(())
            }
            NegotiationPhase::Closed => Err(NegotiationError::Closed),
            phase => Err(NegotiationError::UnexpectedOffer { phase }),
        }
    }

    /// `Negotiating → Established`, on a remote answer.
    ///
    /// Must be called *before* the description is handed to the engine, so
    /// a duplicate answer is rejected even while the first one is still
    /// being applied.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Closed`] when closed, otherwise
    /// [`NegotiationError::UnexpectedDescription`] for an offer, or for any
    /// description outside `Negotiating`.
    pub fn accept_remote(&mut self, kind: SdpType) -> Result<(), NegotiationError> {
        match (self.phase, kind) {
            (NegotiationPhase::Negotiating, SdpType::Answer) => {
                self.phase = NegotiationPhase::Established;
                Ok(())
            }
            (NegotiationPhase::Closed, _) => Err(NegotiationError::Closed),
            (phase, kind) => Err(NegotiationError::UnexpectedDescription { kind, phase }),
        }
    }

    /// Checks that a candidate may be exchanged.  Never changes the phase.
    ///
    /// # Errors
    ///
    /// [`NegotiationError::Closed`] when closed.
    pub fn check_candidate(&self) -> Result<(), NegotiationError> {
        if self.is_closed() {
            Err(NegotiationError::Closed)
        } else {
            Ok(())
        }
    }

    /// Moves to `Closed`.
    ///
    /// Returns `true` only for the call that performed the transition, so
    /// callers can run teardown exactly once.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            false
        } else {
            self.phase = NegotiationPhase::Closed;
            true
        }
    }
}

impl Default for Negotiation {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn negotiating() -> Negotiation {
        let mut n = Negotiation::new();
        n.request_offer().unwrap();
        n.offer_sent().unwrap();
        n
    }

    #[test]
    fn test_new_negotiation_is_idle() {
        assert_eq!(Negotiation::new().phase(), NegotiationPhase::Idle);
    }

    #[test]
    fn test_happy_path_reaches_established() {
        // Arrange
        let mut n = Negotiation::new();

        // Act
        n.request_offer().unwrap();
        assert_eq!(n.phase(), NegotiationPhase::OfferPending);
        n.offer_sent().unwrap();
        assert_eq!(n.phase(), NegotiationPhase::Negotiating);
        n.accept_remote(SdpType::Answer).unwrap();

        // Assert
        assert_eq!(n.phase(), NegotiationPhase::Established);
    }

    #[test]
    fn test_second_negotiation_needed_is_rejected() {
        let mut n = Negotiation::new();
        n.request_offer().unwrap();

        let err = n.request_offer().unwrap_err();

        assert_eq!(
            err,
            NegotiationError::UnexpectedNegotiationNeeded {
                phase: NegotiationPhase::OfferPending
            }
        );
        assert_eq!(n.phase(), NegotiationPhase::OfferPending);
    }

    #[test]
    fn test_answer_in_idle_is_rejected_and_phase_unchanged() {
        let mut n = Negotiation::new();

        let err = n.accept_remote(SdpType::Answer).unwrap_err();

        assert_eq!(
            err,
            NegotiationError::UnexpectedDescription {
                kind: SdpType::Answer,
                phase: NegotiationPhase::Idle
            }
        );
        assert_eq!(n.phase(), NegotiationPhase::Idle);
    }

    #[test]
    fn test_remote_offer_while_negotiating_is_rejected() {
        let mut n = negotiating();

        let err = n.accept_remote(SdpType::Offer).unwrap_err();

        assert!(matches!(err, NegotiationError::UnexpectedDescription { kind: SdpType::Offer, .. }));
        assert_eq!(n.phase(), NegotiationPhase::Negotiating);
    }

    #[test]
    fn test_duplicate_answer_is_rejected_and_stays_established() {
        let mut n = negotiating();
        n.accept_remote(SdpType::Answer).unwrap();

        let err = n.accept_remote(SdpType::Answer).unwrap_err();

        assert_eq!(
            err,
            NegotiationError::UnexpectedDescription {
                kind: SdpType::Answer,
                phase: NegotiationPhase::Established
            }
        );
        assert_eq!(n.phase(), NegotiationPhase::Established);
    }

    #[test]
    fn test_candidates_are_allowed_in_every_open_phase() {
        let mut n = Negotiation::new();
        assert!(n.check_candidate().is_ok());
        n.request_offer().unwrap();
        assert!(n.check_candidate().is_ok());
        n.offer_sent().unwrap();
        assert!(n.check_candidate().is_ok());
        n.accept_remote(SdpType::Answer).unwrap();
        assert!(n.check_candidate().is_ok());
    }

    #[test]
    fn test_close_reports_the_first_transition_only() {
        let mut n = negotiating();

        assert!(n.close());
        assert!(!n.close());
        assert!(n.is_closed());
    }

    #[test]
    fn test_every_transition_fails_once_closed() {
        let mut n = Negotiation::new();
        n.close();

        assert_eq!(n.request_offer(), Err(NegotiationError::Closed));
        assert_eq!(n.offer_sent(), Err(NegotiationError::Closed));
        assert_eq!(n.accept_remote(SdpType::Answer), Err(NegotiationError::Closed));
        assert_eq!(n.check_candidate(), Err(NegotiationError::Closed));
    }

    #[test]
    fn test_offer_sent_after_close_does_not_reopen() {
        // The channel can close while the engine is still producing the offer.
        let mut n = Negotiation::new();
        n.request_offer().unwrap();
        n.close();

        assert_eq!(n.offer_sent(), Err(NegotiationError::Closed));
        assert_eq!(n.phase(), NegotiationPhase::Closed);
    }

    #[test]
    fn test_phase_display_names() {
        assert_eq!(NegotiationPhase::OfferPending.to_string(), "offer-pending");
        assert_eq!(NegotiationPhase::Closed.to_string(), "closed");
    }
}
