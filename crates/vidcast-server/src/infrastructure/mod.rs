//! Infrastructure layer for vidcast-server.
//!
//! Everything that touches the network, the filesystem or the media engine:
//!
//! - [`http_server`]: axum router, static files, WebSocket upgrade, serve loop
//! - [`ws_channel`]: WebSocket ↔ signaling channel adapter and writer task
//! - [`memory_channel`]: in-process channel for tests
//! - [`config_file`]: TOML configuration file
//! - [`media`]: the `webrtc` pipeline and the recording mock

pub mod config_file;
pub mod http_server;
pub mod media;
pub mod memory_channel;
pub mod ws_channel;

pub use http_server::{router, run_server, serve, AppState};
