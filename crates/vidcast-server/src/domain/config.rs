//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for runtime settings.  It
//! is assembled once at startup (file, environment, CLI) by the binary and
//! then shared read-only as an `Arc` across connection tasks.  Nothing in
//! this module reads files or the environment.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Default HTTP/WebSocket port.
pub const DEFAULT_PORT: u16 = 4664;

/// All runtime configuration for the signaling server.
///
/// ```rust
/// use vidcast_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 4664);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.  Serves `/`, the client script
    /// and the `/ws` upgrade.
    pub bind_addr: SocketAddr,

    /// Directory holding `index.html` and `video_client.js`.
    pub static_dir: PathBuf,

    /// Longest a session waits to enqueue one outbound frame before it
    /// treats the channel as closed.
    pub send_timeout: Duration,

    /// Upper bound on the media pipeline's `stop()` during teardown.
    pub teardown_timeout: Duration,

    /// How long the process waits for live sessions after a shutdown signal.
    pub shutdown_grace: Duration,

    /// Filter used when `RUST_LOG` is unset.
    pub log_level: String,

    /// Media source and encoder settings.
    pub media: MediaConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            static_dir: PathBuf::from("./static"),
            send_timeout: Duration::from_secs(5),
            teardown_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_secs(10),
            log_level: "info".to_string(),
            media: MediaConfig::default(),
        }
    }
}

/// Settings for the server-side video source.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaConfig {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Frames per second.
    pub framerate: u32,
    /// VP8 IVF file streamed to every browser, looped at end of file.
    pub source: PathBuf,
    /// STUN/TURN URLs handed to the engine.  Empty means host candidates only.
    pub ice_servers: Vec<String>,
}

impl MediaConfig {
    /// Spacing between consecutive frames.  A zero frame rate is clamped to 1.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.framerate.max(1)
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            framerate: 30,
            source: PathBuf::from("./media/source.ivf"),
            ice_servers: Vec::new(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
