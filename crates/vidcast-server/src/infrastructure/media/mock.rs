//! Recording media pipeline for tests and media-less runs.
//!
//! Every call made on a [`MockPipeline`]'s sessions is recorded in order,
//! and tests play the engine by calling [`MockPipeline::emit`].
//!
//! # Example
//!
//! ```rust
//! use vidcast_server::infrastructure::media::mock::{MediaCall, MockPipeline};
//!
//! let pipeline = MockPipeline::new();
//! assert!(pipeline.calls().is_empty());
//! assert_eq!(pipeline.count(|c| matches!(c, MediaCall::Stop)), 0);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use vidcast_core::{IceCandidate, SessionDescription};

use crate::application::media::{
    EngineError, MediaEvent, MediaEventSender, MediaPipeline, MediaSession, PipelineError,
};

/// SDP body returned by `create_offer` unless overridden.
pub const MOCK_OFFER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=vidcast\r\nt=0 0\r\n";

/// One recorded call on a mock media session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    Start,
    Stop,
    CreateOffer,
    SetLocalDescription(SessionDescription),
    SetRemoteDescription(SessionDescription),
    AddRemoteCandidate(IceCandidate),
}

/// How the mock engine responds.
#[derive(Debug, Clone)]
pub struct MockBehaviour {
    pub fail_build: bool,
    pub fail_start: bool,
    pub reject_remote_description: bool,
    pub reject_candidates: bool,
    /// Emit `NegotiationNeeded` from `start()`, like a real engine does.
    pub negotiate_on_start: bool,
    pub offer_sdp: String,
}

impl Default for MockBehaviour {
    fn default() -> Self {
        Self {
            fail_build: false,
            fail_start: false,
            reject_remote_description: false,
            reject_candidates: false,
            negotiate_on_start: false,
            offer_sdp: MOCK_OFFER_SDP.to_string(),
        }
    }
}

#[derive(Default)]
struct Shared {
    behaviour: MockBehaviour,
    calls: Mutex<Vec<MediaCall>>,
    events: Mutex<Option<MediaEventSender>>,
}

impl Shared {
    fn record(&self, call: MediaCall) {
        lock(&self.calls).push(call);
    }

    fn emit(&self, event: MediaEvent) -> bool {
        match lock(&self.events).as_ref() {
            Some(sender) => sender.emit(event),
            None => false,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A [`MediaPipeline`] whose sessions record calls instead of streaming.
///
/// Clones share the same record.  Events go to the most recently built
/// session.
#[derive(Clone, Default)]
pub struct MockPipeline {
    shared: Arc<Shared>,
}

impl MockPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behaviour(behaviour: MockBehaviour) -> Self {
        Self {
            shared: Arc::new(Shared {
                behaviour,
                ..Shared::default()
            }),
        }
    }

    /// Plays the engine: pushes `event` to the latest session.
    ///
    /// Returns `false` when no session is listening.
    pub fn emit(&self, event: MediaEvent) -> bool {
        self.shared.emit(event)
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<MediaCall> {
        lock(&self.shared.calls).clone()
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&MediaCall) -> bool) -> usize {
        lock(&self.shared.calls).iter().filter(|c| pred(c)).count()
    }

    pub fn stop_count(&self) -> usize {
        self.count(|c| matches!(c, MediaCall::Stop))
    }

    /// Descriptions passed to `set_remote_description`, in order.
    pub fn remote_descriptions(&self) -> Vec<SessionDescription> {
        lock(&self.shared.calls)
            .iter()
            .filter_map(|c| match c {
                MediaCall::SetRemoteDescription(desc) => Some(desc.clone()),
                _ => None,
            })
            .collect()
    }

    /// Candidates passed to `add_remote_candidate`, in order.
    pub fn remote_candidates(&self) -> Vec<IceCandidate> {
        lock(&self.shared.calls)
            .iter()
            .filter_map(|c| match c {
                MediaCall::AddRemoteCandidate(candidate) => Some(candidate.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MediaPipeline for MockPipeline {
    async fn build(
        &self,
        events: MediaEventSender,
    ) -> Result<Box<dyn MediaSession>, PipelineError> {
        if self.shared.behaviour.fail_build {
            return Err(PipelineError::SourceUnavailable {
                path: "mock".to_string(),
                reason: "build failure requested".to_string(),
            });
        }
        *lock(&self.shared.events) = Some(events);
        Ok(Box::new(MockMediaSession {
            shared: Arc::clone(&self.shared),
        }))
    }
}

/// Session handle produced by [`MockPipeline`].
pub struct MockMediaSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl MediaSession for MockMediaSession {
    async fn start(&self) -> Result<(), EngineError> {
        self.shared.record(MediaCall::Start);
        if self.shared.behaviour.fail_start {
            return Err(EngineError::Other("start failure requested".to_string()));
        }
        if self.shared.behaviour.negotiate_on_start {
            self.shared.emit(MediaEvent::NegotiationNeeded);
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.shared.record(MediaCall::Stop);
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        self.shared.record(MediaCall::CreateOffer);
        Ok(SessionDescription::offer(self.shared.behaviour.offer_sdp.clone()))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.shared.record(MediaCall::SetLocalDescription(desc));
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        self.shared.record(MediaCall::SetRemoteDescription(desc));
        if self.shared.behaviour.reject_remote_description {
            return Err(EngineError::Description("rejected by mock".to_string()));
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        self.shared.record(MediaCall::AddRemoteCandidate(candidate));
        if self.shared.behaviour.reject_candidates {
            return Err(EngineError::Candidate("rejected by mock".to_string()));
        }
        Ok(())
    }
}
