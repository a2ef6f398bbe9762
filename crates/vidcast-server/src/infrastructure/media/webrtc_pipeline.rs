//! Media pipeline backed by the `webrtc` crate.
//!
//! Each browser gets its own `RTCPeerConnection` carrying one send-only VP8
//! track.  Frames come from a VP8 IVF file that is read in a loop and paced
//! at the configured frame rate.
//!
//! ```text
//!  source.ivf ──IVFReader──▶ frame pump ──write_sample──▶ TrackLocalStaticSample
//!                                                               │
//!  MediaEventSender ◀── on_negotiation_needed / on_ice_candidate ┴─ RTCPeerConnection
//! ```
//!
//! Browser candidates that arrive before the answer are held here until the
//! remote description is applied, since the peer connection refuses them
//! earlier.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::io::ivf_reader::IVFReader;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

use vidcast_core::{IceCandidate, SdpType, SessionDescription};

use crate::application::media::{
    EngineError, MediaEvent, MediaEventSender, MediaPipeline, MediaSession, PipelineError,
};
use crate::domain::MediaConfig;

const VP8_FOURCC: [u8; 4] = *b"VP80";
const VP8_CLOCK_RATE: u32 = 90_000;

// ── Pipeline ──────────────────────────────────────────────────────────────────

/// Builds one peer connection per browser from a shared [`MediaConfig`].
#[derive(Debug, Clone)]
pub struct WebRtcPipeline {
    config: Arc<MediaConfig>,
}

impl WebRtcPipeline {
    pub fn new(config: MediaConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    fn rtc_configuration(&self) -> RTCConfiguration {
        let ice_servers = if self.config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        RTCConfiguration {
            ice_servers,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MediaPipeline for WebRtcPipeline {
    async fn build(
        &self,
        events: MediaEventSender,
    ) -> Result<Box<dyn MediaSession>, PipelineError> {
        let (width, height) = check_source(&self.config.source)?;
        if !matches_configured_size(&self.config, width, height) {
            warn!(
                source = %self.config.source.display(),
                "source is {width}x{height} but {}x{} is configured; frames are sent unscaled",
                self.config.width,
                self.config.height
            );
        }

        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| EngineError::Other(format!("failed to register codecs: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)
            .map_err(|e| EngineError::Other(format!("failed to register interceptors: {e}")))?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(
            api.new_peer_connection(self.rtc_configuration())
                .await
                .map_err(|e| EngineError::Other(format!("failed to create peer connection: {e}")))?,
        );
        wire_callbacks(&pc, events);

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: VP8_CLOCK_RATE,
                ..Default::default()
            },
            "video".to_string(),
            "vidcast".to_string(),
        ));

        Ok(Box::new(WebRtcSession {
            pc,
            track,
            config: Arc::clone(&self.config),
            pump: Mutex::new(None),
            pending_candidates: tokio::sync::Mutex::new(Vec::new()),
        }))
    }
}

/// Fails unless `path` is a readable VP8 IVF file; returns its frame size.
fn check_source(path: &Path) -> Result<(u16, u16), PipelineError> {
    let unavailable = |reason: String| PipelineError::SourceUnavailable {
        path: path.display().to_string(),
        reason,
    };
    let file = File::open(path).map_err(|e| unavailable(e.to_string()))?;
    let (_, header) =
        IVFReader::new(BufReader::new(file)).map_err(|e| unavailable(e.to_string()))?;
    if header.four_cc != VP8_FOURCC {
        return Err(unavailable(format!(
            "expected VP80 stream, found {}",
            String::from_utf8_lossy(&header.four_cc)
        )));
    }
    debug!(
        width = header.width,
        height = header.height,
        "media source validated"
    );
    Ok((header.width, header.height))
}

fn matches_configured_size(config: &MediaConfig, width: u16, height: u16) -> bool {
    u32::from(width) == config.width && u32::from(height) == config.height
}

/// Routes engine callbacks into the session's event queue.
fn wire_callbacks(pc: &RTCPeerConnection, events: MediaEventSender) {
    let on_negotiation = events.clone();
    pc.on_negotiation_needed(Box::new(move || {
        on_negotiation.emit(MediaEvent::NegotiationNeeded);
        Box::pin(async {})
    }));

    let on_candidate = events.clone();
    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        // `None` marks the end of gathering; the browser needs no frame for it.
        if let Some(candidate) = candidate {
            match candidate.to_json() {
                Ok(init) => {
                    on_candidate.emit(MediaEvent::LocalCandidate(IceCandidate::new(
                        init.sdp_mline_index.unwrap_or(0),
                        init.candidate,
                    )));
                }
                Err(e) => warn!("could not serialise local candidate: {e}"),
            }
        }
        Box::pin(async {})
    }));

    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        debug!(%state, "peer connection state changed");
        if state == RTCPeerConnectionState::Failed {
            events.emit(MediaEvent::Failed("peer connection failed".to_string()));
        }
        Box::pin(async {})
    }));
}

// ── Session handle ────────────────────────────────────────────────────────────

struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
    track: Arc<TrackLocalStaticSample>,
    config: Arc<MediaConfig>,
    pump: Mutex<Option<JoinHandle<()>>>,
    pending_candidates: tokio::sync::Mutex<Vec<RTCIceCandidateInit>>,
}

impl WebRtcSession {
    async fn flush_pending_candidates(&self) -> Result<(), EngineError> {
        let pending: Vec<_> = self.pending_candidates.lock().await.drain(..).collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), "applying held remote candidates");
        }
        for init in pending {
            self.pc
                .add_ice_candidate(init)
                .await
                .map_err(|e| EngineError::Candidate(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaSession for WebRtcSession {
    async fn start(&self) -> Result<(), EngineError> {
        let rtp_sender = self
            .pc
            .add_track(self.track.clone())
            .await
            .map_err(|e| EngineError::Other(format!("failed to add video track: {e}")))?;

        // RTCP must be read for the interceptors (NACK, reports) to run.
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while rtp_sender.read(&mut rtcp_buf).await.is_ok() {}
        });

        let pump = tokio::spawn(pump_frames(
            Arc::clone(&self.track),
            self.config.source.clone(),
            self.config.frame_interval(),
        ));
        *self.pump.lock().unwrap_or_else(PoisonError::into_inner) = Some(pump);
        info!(
            width = self.config.width,
            height = self.config.height,
            fps = self.config.framerate,
            "video track started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        if let Some(pump) = self
            .pump
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            pump.abort();
        }
        self.pc
            .close()
            .await
            .map_err(|e| EngineError::Other(format!("failed to close peer connection: {e}")))
    }

    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| EngineError::Offer(e.to_string()))?;
        Ok(SessionDescription::offer(offer.sdp))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_local_description(desc)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), EngineError> {
        let desc = to_rtc_description(desc)?;
        self.pc
            .set_remote_description(desc)
            .await
            .map_err(|e| EngineError::Description(e.to_string()))?;
        self.flush_pending_candidates().await
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), EngineError> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate().to_string(),
            sdp_mline_index: Some(candidate.sdp_mline_index()),
            ..Default::default()
        };
        if self.pc.remote_description().await.is_none() {
            trace!("holding remote candidate until the answer is applied");
            self.pending_candidates.lock().await.push(init);
            return Ok(());
        }
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| EngineError::Candidate(e.to_string()))
    }
}

/// Parses the SDP text, so malformed descriptions surface as rejections.
fn to_rtc_description(desc: SessionDescription) -> Result<RTCSessionDescription, EngineError> {
    let sdp = desc.sdp().to_string();
    let parsed = match desc.sdp_type() {
        SdpType::Offer => RTCSessionDescription::offer(sdp),
        SdpType::Answer => RTCSessionDescription::answer(sdp),
    };
    parsed.map_err(|e| EngineError::Description(e.to_string()))
}

// ── Frame pump ────────────────────────────────────────────────────────────────

/// Writes IVF frames to `track` every `frame_interval`, restarting at end of
/// file.  Returns when the file can no longer be opened or holds no frames.
async fn pump_frames(track: Arc<TrackLocalStaticSample>, source: PathBuf, frame_interval: Duration) {
    let mut ticker = interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let mut reader = match File::open(&source)
            .map_err(|e| e.to_string())
            .and_then(|f| IVFReader::new(BufReader::new(f)).map_err(|e| e.to_string()))
        {
            Ok((reader, _header)) => reader,
            Err(e) => {
                warn!(source = %source.display(), "media source lost: {e}");
                return;
            }
        };

        let mut frames = 0u64;
        while let Ok((frame, _)) = reader.parse_next_frame() {
            ticker.tick().await;
            let sample = Sample {
                data: frame.freeze(),
                duration: frame_interval,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                trace!("sample dropped: {e}");
            }
            frames += 1;
        }

        if frames == 0 {
            warn!(source = %source.display(), "media source has no frames");
            return;
        }
        trace!(frames, "end of media source, looping");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
