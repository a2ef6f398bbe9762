//! vidcast server entry point.
//!
//! Serves a browser page and a signaling WebSocket on one port, and streams
//! a VP8 video file to every browser that connects.
//!
//! # Usage
//!
//! ```text
//! vidcast-server [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>          TOML configuration file
//!       --bind <IP>              Listen address [default: 0.0.0.0]
//!   -p, --port <PORT>            Listen port [default: 4664]
//!       --static-dir <DIR>       Browser client files [default: ./static]
//!       --source <FILE>          VP8 IVF video source [default: ./media/source.ivf]
//!       --width/--height <PX>    Frame size [default: 640x480]
//!       --framerate <FPS>        Frame rate [default: 30]
//!       --ice-server <URL>       STUN/TURN URL, repeatable
//! ```
//!
//! A source file can be produced with
//! `ffmpeg -i input.mp4 -c:v libvpx -s 640x480 -r 30 -an media/source.ivf`.
//!
//! # Configuration precedence
//!
//! CLI flags, then `VIDCAST_*` environment variables, then the `--config`
//! file, then built-in defaults.  `RUST_LOG` overrides the configured log
//! level.
//!
//! | Variable                  | Flag                 |
//! |---------------------------|----------------------|
//! | `VIDCAST_CONFIG`          | `--config`           |
//! | `VIDCAST_BIND`            | `--bind`             |
//! | `VIDCAST_PORT`            | `--port`             |
//! | `VIDCAST_STATIC_DIR`      | `--static-dir`       |
//! | `VIDCAST_SOURCE`          | `--source`           |
//! | `VIDCAST_ICE_SERVERS`     | `--ice-server` (comma separated) |
//! | `VIDCAST_LOG`             | `--log-level`        |

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vidcast_server::application::{MediaPipeline, SessionManager};
use vidcast_server::domain::ServerConfig;
use vidcast_server::infrastructure::config_file::{load_config, ConfigFile};
use vidcast_server::infrastructure::media::WebRtcPipeline;
use vidcast_server::infrastructure::run_server;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// WebRTC video server.
///
/// Every flag is optional; unset flags fall back to the configuration file
/// and then to built-in defaults.
#[derive(Debug, Default, Parser)]
#[command(
    name = "vidcast-server",
    about = "Streams a video source to browsers over WebRTC",
    version
)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "VIDCAST_CONFIG")]
    config: Option<PathBuf>,

    /// IP address to listen on.
    #[arg(long, env = "VIDCAST_BIND")]
    bind: Option<String>,

    /// TCP port for HTTP and the signaling WebSocket.
    #[arg(short, long, env = "VIDCAST_PORT")]
    port: Option<u16>,

    /// Directory holding index.html and video_client.js.
    #[arg(long, env = "VIDCAST_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// VP8 IVF file streamed to browsers.
    #[arg(long, env = "VIDCAST_SOURCE")]
    source: Option<PathBuf>,

    #[arg(long, env = "VIDCAST_WIDTH")]
    width: Option<u32>,

    #[arg(long, env = "VIDCAST_HEIGHT")]
    height: Option<u32>,

    #[arg(long, env = "VIDCAST_FRAMERATE")]
    framerate: Option<u32>,

    /// STUN/TURN server URL.  Repeat the flag for several servers.
    #[arg(long = "ice-server", env = "VIDCAST_ICE_SERVERS", value_delimiter = ',')]
    ice_servers: Vec<String>,

    /// Seconds a session may wait to queue one outbound frame.
    #[arg(long, env = "VIDCAST_SEND_TIMEOUT")]
    send_timeout: Option<u64>,

    /// Seconds allowed for stopping a session's media pipeline.
    #[arg(long, env = "VIDCAST_TEARDOWN_TIMEOUT")]
    teardown_timeout: Option<u64>,

    /// Seconds to wait for open sessions on shutdown.
    #[arg(long, env = "VIDCAST_SHUTDOWN_GRACE")]
    shutdown_grace: Option<u64>,

    /// Log filter used when RUST_LOG is unset (e.g. `info`, `vidcast_server=debug`).
    #[arg(long, env = "VIDCAST_LOG")]
    log_level: Option<String>,
}

impl Cli {
    /// Layers the flags over the configuration file (or defaults).
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file cannot be read or parsed,
    /// or if the bind address is not an IP address.
    fn into_server_config(self) -> anyhow::Result<ServerConfig> {
        let mut file = match &self.config {
            Some(path) => load_config(path)
                .with_context(|| format!("failed to load config file {}", path.display()))?,
            None => ConfigFile::default(),
        };

        let server = &mut file.server;
        if let Some(bind) = self.bind {
            server.bind_address = bind;
        }
        if let Some(port) = self.port {
            server.port = port;
        }
        if let Some(dir) = self.static_dir {
            server.static_dir = dir;
        }
        if let Some(secs) = self.send_timeout {
            server.send_timeout_secs = secs;
        }
        if let Some(secs) = self.teardown_timeout {
            server.teardown_timeout_secs = secs;
        }
        if let Some(secs) = self.shutdown_grace {
            server.shutdown_grace_secs = secs;
        }
        if let Some(level) = self.log_level {
            server.log_level = level;
        }

        let media = &mut file.media;
        if let Some(source) = self.source {
            media.source = source;
        }
        if let Some(width) = self.width {
            media.width = width;
        }
        if let Some(height) = self.height {
            media.height = height;
        }
        if let Some(framerate) = self.framerate {
            media.framerate = framerate;
        }
        if !self.ice_servers.is_empty() {
            media.ice_servers = self.ice_servers;
        }

        file.into_server_config().context("invalid configuration")
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_server_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    info!(
        "vidcast starting: http={}, source={}, {}x{}@{}",
        config.bind_addr,
        config.media.source.display(),
        config.media.width,
        config.media.height,
        config.media.framerate
    );
    if !config.media.source.exists() {
        warn!(
            "media source {} not found; browsers will be disconnected until it exists",
            config.media.source.display()
        );
    }

    let pipeline: Arc<dyn MediaPipeline> = Arc::new(WebRtcPipeline::new(config.media.clone()));
    let manager = SessionManager::new();
    let shutdown = shutdown_signal(manager.clone(), config.shutdown_grace);

    run_server(config, pipeline, manager, shutdown).await?;

    info!("vidcast stopped");
    Ok(())
}

/// Resolves after Ctrl+C once every session has closed, or the grace period
/// has run out.
async fn shutdown_signal(manager: SessionManager, grace: Duration) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received Ctrl+C, initiating graceful shutdown"),
        Err(e) => {
            error!("failed to listen for Ctrl+C signal: {e}");
            std::future::pending::<()>().await;
        }
    }

    drain_sessions(&manager, grace).await;
}

/// Closes every session, logging the ones still open when `grace` runs out.
async fn drain_sessions(manager: &SessionManager, grace: Duration) {
    if timeout(grace, manager.shutdown_all()).await.is_err() {
        let open = manager.snapshot().await;
        warn!(
            live = open.len(),
            "sessions still open after {grace:?}, exiting anyway"
        );
        for session in &open {
            warn!(
                session = %session.id,
                peer = %session.peer,
                phase = session.phase.as_str(),
                "session did not close in time"
            );
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
