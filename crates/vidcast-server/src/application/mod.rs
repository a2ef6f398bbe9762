//! Application layer: session orchestration.
//!
//! Depends on `vidcast-core` for the wire protocol and negotiation rules, and
//! on the traits declared here for the media engine and the channel.  The
//! concrete WebSocket and `webrtc` implementations live in `infrastructure`.

pub mod channel;
pub mod media;
pub mod session;
pub mod session_manager;

pub use channel::{ChannelClosed, ChannelError, ChannelSender, SignalingChannel};
pub use media::{EngineError, MediaEvent, MediaEventSender, MediaPipeline, MediaSession, PipelineError};
pub use session::{CloseReason, Session, SessionError, SessionOptions, SessionState};
pub use session_manager::{SessionInfo, SessionManager};
