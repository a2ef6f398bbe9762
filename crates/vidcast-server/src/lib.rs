//! vidcast-server library crate.
//!
//! Streams a server-side video source to browsers over WebRTC.  The browser
//! loads a small page, opens a WebSocket to `/ws`, and the server drives the
//! offer/answer and candidate exchange for that connection.
//!
//! # Architecture
//!
//! ```text
//! Browser (JSON over WebSocket)          webrtc engine (RTP/SRTP to browser)
//!         ↕                                        ↕
//! [vidcast-server]
//!   ├── domain/           ServerConfig, MediaConfig
//!   ├── application/      Session, SessionManager, channel + media traits
//!   └── infrastructure/
//!         ├── http_server/     axum routes, WebSocket upgrade
//!         ├── ws_channel/      socket split + writer task
//!         ├── config_file/     TOML configuration
//!         └── media/           WebRtcPipeline, MockPipeline
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `vidcast-core`, and reaches the
//!   outside world only through the `SignalingChannel`, `ChannelSender` and
//!   `MediaPipeline` seams.
//! - `infrastructure` implements those seams.

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: session state machine and registry.
pub mod application;

/// Infrastructure layer: HTTP/WebSocket server, media engine, config file.
pub mod infrastructure;
