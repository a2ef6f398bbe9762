//! The media engine as seen by a session.
//!
//! A [`MediaPipeline`] builds one [`MediaSession`] per browser.  The session
//! handle exposes the offer/answer and candidate operations; everything the
//! engine wants to tell the session (negotiation needed, a local candidate,
//! a fatal failure) arrives as a [`MediaEvent`] on the queue handed to
//! `build`.  Engine callbacks run on the engine's own tasks and only ever
//! push onto that queue.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

use vidcast_core::{IceCandidate, SessionDescription};

/// Something the engine reports to the owning session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// The engine wants a fresh offer.
    NegotiationNeeded,
    /// A local connectivity candidate was gathered and should go to the browser.
    LocalCandidate(IceCandidate),
    /// The pipeline can no longer deliver media.
    Failed(String),
}

/// Producer side of a session's media event queue.
///
/// Cheap to clone; engine callbacks each hold one.  Emitting after the
/// session has gone away is a silent no-op.
#[derive(Debug, Clone)]
pub struct MediaEventSender {
    tx: mpsc::UnboundedSender<MediaEvent>,
}

impl MediaEventSender {
    /// Queues `event` for the session.  Returns `false` when the session is gone.
    pub fn emit(&self, event: MediaEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(mpsc::error::SendError(event)) => {
                trace!(?event, "media event after session end (dropped)");
                false
            }
        }
    }
}

/// Creates an unbounded media event queue.
pub fn media_events() -> (MediaEventSender, mpsc::UnboundedReceiver<MediaEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MediaEventSender { tx }, rx)
}

/// The engine refused an operation on a live session.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine rejected the session description: {0}")]
    Description(String),

    #[error("engine rejected the ICE candidate: {0}")]
    Candidate(String),

    #[error("engine could not create an offer: {0}")]
    Offer(String),

    #[error("engine failure: {0}")]
    Other(String),
}

/// A media session handle could not be built or started.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The configured video source cannot be read or is not VP8 IVF.
    #[error("media source {path} unavailable: {reason}")]
    SourceUnavailable { path: String, reason: String },

    /// The engine failed while assembling the peer connection.
    #[error("engine setup failed: {0}")]
    Engine(#[from] EngineError),
}

/// One media session, exclusively owned by one signaling session.
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Starts media flow.  The engine raises `NegotiationNeeded` afterwards.
    async fn start(&self) -> Result<(), EngineError>;

    /// Stops media flow and releases engine resources.  Called exactly once.
    async fn stop(&self) -> Result<(), EngineError>;

    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError>;

    /// Applies a browser candidate.  May arrive before any description.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError>;
}

/// Builds media sessions.  Shared by every connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaPipeline: Send + Sync {
    /// Builds a session handle whose engine events go to `events`.
    async fn build(&self, events: MediaEventSender)
        -> Result<Box<dyn MediaSession>, PipelineError>;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emitted_events_arrive_in_order() {
        // Arrange
        let (tx, mut rx) = media_events();

        // Act
        tx.emit(MediaEvent::NegotiationNeeded);
        tx.emit(MediaEvent::LocalCandidate(IceCandidate::new(0, "candidate:1")));

        // Assert
        assert_eq!(rx.recv().await, Some(MediaEvent::NegotiationNeeded));
        assert_eq!(
            rx.recv().await,
            Some(MediaEvent::LocalCandidate(IceCandidate::new(0, "candidate:1")))
        );
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_harmless() {
        let (tx, rx) = media_events();
        drop(rx);

        assert!(!tx.emit(MediaEvent::NegotiationNeeded));
    }

    #[test]
    fn test_pipeline_error_wraps_engine_error() {
        let err: PipelineError = EngineError::Other("no codecs".into()).into();
        assert_eq!(err.to_string(), "engine setup failed: engine failure: no codecs");
    }
}
