//! Session orchestration: one browser channel bound to one media session.
//!
//! A [`Session`] is opened when a browser connects and runs as a single task
//! that multiplexes three inputs:
//!
//! - engine events ([`MediaEvent`]), pushed by the engine's callbacks,
//! - inbound text frames from the [`SignalingChannel`],
//! - the manager's shutdown signal.
//!
//! Every state change goes through [`SessionState`], whose lock is never
//! held across an `.await`.  Outbound frames go through a [`ChannelSender`].
//!
//! # Error policy
//!
//! | Error                        | Effect                                  |
//! |------------------------------|-----------------------------------------|
//! | `ChannelClosed`              | debug log, session closes               |
//! | `ProtocolViolation`          | warn log, frame dropped, session lives  |
//! | `EngineRejected`             | warn log, session closes                |
//! | `PipelineFailed`             | warn log, session closes                |
//! | `PipelineConstructionFailed` | error log, session never starts         |
//!
//! Nothing is ever sent to the browser about an error; its channel simply
//! closes.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use vidcast_core::{
    decode_frame, encode_frame, Negotiation, NegotiationError, NegotiationPhase, ProtocolError,
    SessionId, SignalingMessage,
};

use crate::application::channel::{ChannelClosed, ChannelSender, SignalingChannel};
use crate::application::media::{
    media_events, EngineError, MediaEvent, MediaPipeline, MediaSession, PipelineError,
};
use crate::application::session_manager::SessionManager;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Everything that can go wrong inside one session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The browser channel is gone.  An expected race, not a fault.
    #[error("signaling channel closed")]
    ChannelClosed,

    /// The browser sent a frame that cannot be applied in the current phase,
    /// or that does not decode.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The engine refused a description or candidate.
    #[error(transparent)]
    EngineRejected(#[from] EngineError),

    /// The engine reported that media can no longer flow.
    #[error("media pipeline failed: {0}")]
    PipelineFailed(String),

    /// The media session could not be built or started.
    #[error("media pipeline construction failed: {0}")]
    PipelineConstructionFailed(#[from] PipelineError),
}

impl SessionError {
    /// `false` only for errors that drop a frame and keep the session alive.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::ProtocolViolation(_))
    }
}

impl From<ChannelClosed> for SessionError {
    fn from(_: ChannelClosed) -> Self {
        SessionError::ChannelClosed
    }
}

impl From<ProtocolError> for SessionError {
    fn from(err: ProtocolError) -> Self {
        SessionError::ProtocolViolation(err.to_string())
    }
}

impl From<NegotiationError> for SessionError {
    fn from(err: NegotiationError) -> Self {
        SessionError::ProtocolViolation(err.to_string())
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum CloseReason {
    /// The browser closed the channel.
    PeerClosed,
    /// The channel failed underneath the session.
    Transport(String),
    /// [`SessionManager::shutdown_all`] asked the session to close.
    Shutdown,
    /// A fatal [`SessionError`].
    Error(SessionError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::PeerClosed => f.write_str("peer closed the channel"),
            CloseReason::Transport(reason) => write!(f, "transport error: {reason}"),
            CloseReason::Shutdown => f.write_str("server shutdown"),
            CloseReason::Error(err) => write!(f, "{err}"),
        }
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

#[derive(Debug)]
struct StateInner {
    negotiation: Negotiation,
    writable: bool,
}

/// Negotiation phase plus the "channel writable" flag of one session.
///
/// Shared with the [`SessionManager`] for snapshots.  The lock is only held
/// for the duration of a transition.
#[derive(Debug)]
pub struct SessionState {
    inner: Mutex<StateInner>,
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                negotiation: Negotiation::new(),
                writable: true,
            }),
        }
    }

    pub fn phase(&self) -> NegotiationPhase {
        self.lock().negotiation.phase()
    }

    /// `false` once a send has failed or the session has closed.
    pub fn is_writable(&self) -> bool {
        self.lock().writable
    }

    fn transition<F>(&self, f: F) -> Result<(), NegotiationError>
    where
        F: FnOnce(&mut Negotiation) -> Result<(), NegotiationError>,
    {
        f(&mut self.lock().negotiation)
    }

    fn mark_unwritable(&self) {
        self.lock().writable = false;
    }

    /// Moves to `Closed`.  `true` only for the first caller.
    fn close(&self) -> bool {
        let mut inner = self.lock();
        inner.writable = false;
        inner.negotiation.close()
    }

    fn lock(&self) -> MutexGuard<'_, StateInner> {
        // Every critical section is a single field update, so a poisoned
        // guard still holds consistent data.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// Per-session knobs taken from the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Upper bound on `MediaSession::stop` during teardown.
    pub teardown_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            teardown_timeout: Duration::from_secs(5),
        }
    }
}

/// One browser connection and the media session it drives.
pub struct Session {
    id: SessionId,
    state: Arc<SessionState>,
    media: Box<dyn MediaSession>,
    events: mpsc::UnboundedReceiver<MediaEvent>,
    outbound: ChannelSender,
    manager: SessionManager,
    shutdown: watch::Receiver<bool>,
    options: SessionOptions,
}

impl Session {
    /// Registers the session, builds its media handle and starts the pipeline.
    ///
    /// On failure the session is unregistered again and nothing is sent on
    /// `outbound`; dropping it lets the writer close the channel.
    ///
    /// # Errors
    ///
    /// [`SessionError::PipelineConstructionFailed`] when the pipeline cannot
    /// build or start a media session.
    pub async fn open(
        id: SessionId,
        peer: impl Into<String>,
        pipeline: &dyn MediaPipeline,
        outbound: ChannelSender,
        manager: SessionManager,
        options: SessionOptions,
    ) -> Result<Session, SessionError> {
        let state = Arc::new(SessionState::new());
        let shutdown = manager.register(id, peer, Arc::clone(&state)).await;

        let (event_tx, events) = media_events();
        let media = match pipeline.build(event_tx).await {
            Ok(media) => media,
            Err(e) => {
                state.close();
                manager.unregister(id).await;
                return Err(e.into());
            }
        };

        if let Err(e) = media.start().await {
            state.close();
            stop_with_timeout(media.as_ref(), options.teardown_timeout).await;
            manager.unregister(id).await;
            return Err(PipelineError::Engine(e).into());
        }
        debug!("media pipeline started");

        Ok(Session {
            id,
            state,
            media,
            events,
            outbound,
            manager,
            shutdown,
            options,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Shared view of this session's phase.
    pub fn state(&self) -> Arc<SessionState> {
        Arc::clone(&self.state)
    }

    /// Drives the session until the channel ends, a fatal error occurs or the
    /// manager shuts it down, then tears it down.
    pub async fn run<C: SignalingChannel>(mut self, mut inbound: C) -> CloseReason {
        let reason = loop {
            tokio::select! {
                biased;

                () = shutdown_requested(&mut self.shutdown) => break CloseReason::Shutdown,

                Some(event) = self.events.recv() => {
                    if let Err(err) = self.on_media_event(event).await {
                        if let Some(reason) = self.absorb(err) {
                            break reason;
                        }
                    }
                }

                frame = inbound.receive() => match frame {
                    Ok(Some(text)) => {
                        if let Err(err) = self.on_frame(&text).await {
                            if let Some(reason) = self.absorb(err) {
                                break reason;
                            }
                        }
                    }
                    Ok(None) => break CloseReason::PeerClosed,
                    Err(e) => break CloseReason::Transport(e.to_string()),
                },
            }
        };

        self.teardown(&reason).await;
        reason
    }

    // ── Engine events ────────────────────────────────────────────────────────

    async fn on_media_event(&self, event: MediaEvent) -> Result<(), SessionError> {
        match event {
            MediaEvent::NegotiationNeeded => self.send_offer().await,
            MediaEvent::LocalCandidate(candidate) => {
                self.state.transition(|n| n.check_candidate())?;
                debug!(
                    mline = candidate.sdp_mline_index(),
                    "forwarding local candidate"
                );
                self.send(SignalingMessage::Ice(candidate)).await
            }
            MediaEvent::Failed(reason) => Err(SessionError::PipelineFailed(reason)),
        }
    }

    async fn send_offer(&self) -> Result<(), SessionError> {
        if let Err(err) = self.state.transition(Negotiation::request_offer) {
            debug!(%err, "negotiation request ignored");
            return Ok(());
        }

        let offer = self.media.create_offer().await?;
        self.media.set_local_description(offer.clone()).await?;
        self.send(SignalingMessage::Sdp(offer)).await?;
        self.state.transition(Negotiation::offer_sent)?;
        info!("offer sent, waiting for answer");
        Ok(())
    }

    // ── Browser frames ───────────────────────────────────────────────────────

    async fn on_frame(&self, frame: &str) -> Result<(), SessionError> {
        let Some(message) = decode_frame(frame)? else {
            debug!("frame without sdp or ice ignored");
            return Ok(());
        };

        match message {
            SignalingMessage::Sdp(desc) => {
                self.state
                    .transition(|n| n.accept_remote(desc.sdp_type()))?;
                self.media.set_remote_description(desc).await?;
                info!("answer applied, session established");
            }
            SignalingMessage::Ice(candidate) => {
                self.state.transition(|n| n.check_candidate())?;
                debug!(
                    mline = candidate.sdp_mline_index(),
                    "applying remote candidate"
                );
                self.media.add_remote_candidate(candidate).await?;
            }
        }
        Ok(())
    }

    // ── Plumbing ─────────────────────────────────────────────────────────────

    async fn send(&self, message: SignalingMessage) -> Result<(), SessionError> {
        if !self.state.is_writable() {
            return Err(SessionError::ChannelClosed);
        }
        let frame = encode_frame(&message)?;
        debug!(kind = message.kind(), "sending frame");
        if let Err(closed) = self.outbound.send(frame).await {
            self.state.mark_unwritable();
            return Err(closed.into());
        }
        Ok(())
    }

    /// Logs `err` and decides whether the session survives it.
    fn absorb(&self, err: SessionError) -> Option<CloseReason> {
        if !err.is_fatal() {
            warn!(error = %err, "frame dropped");
            return None;
        }
        match err {
            SessionError::ChannelClosed => debug!("channel closed while sending"),
            ref err => warn!(error = %err, "fatal session error"),
        }
        Some(CloseReason::Error(err))
    }

    async fn teardown(self, reason: &CloseReason) {
        if !self.state.close() {
            return;
        }
        stop_with_timeout(self.media.as_ref(), self.options.teardown_timeout).await;
        self.manager.unregister(self.id).await;
        info!(%reason, "session closed");
    }
}

async fn shutdown_requested(signal: &mut watch::Receiver<bool>) {
    // A dropped sender means the registry entry is gone: close as well.
    let _ = signal.wait_for(|stop| *stop).await;
}

async fn stop_with_timeout(media: &dyn MediaSession, limit: Duration) {
    match timeout(limit, media.stop()).await {
        Ok(Ok(())) => debug!("media pipeline stopped"),
        Ok(Err(e)) => warn!(error = %e, "media pipeline stop failed"),
        Err(_) => warn!(?limit, "media pipeline stop timed out"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
