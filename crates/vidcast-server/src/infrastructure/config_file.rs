//! TOML configuration file.
//!
//! Every field is optional; missing fields take the same defaults as
//! [`ServerConfig::default`], so an empty file is a valid configuration.
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 4664
//! static_dir = "./static"
//! send_timeout_secs = 5
//! teardown_timeout_secs = 5
//! shutdown_grace_secs = 10
//! log_level = "info"
//!
//! [media]
//! source = "./media/source.ivf"
//! width = 640
//! height = 480
//! framerate = 30
//! ice_servers = ["stun:stun.l.google.com:19302"]
//! ```

use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{MediaConfig, ServerConfig, DEFAULT_PORT};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error reading config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// `bind_address` is not an IP address.
    #[error("invalid bind address '{value}': {source}")]
    InvalidAddress {
        value: String,
        #[source]
        source: AddrParseError,
    },
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// On-disk configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub media: MediaSection,
}

/// `[server]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
    #[serde(default = "default_teardown_timeout_secs")]
    pub teardown_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            static_dir: default_static_dir(),
            send_timeout_secs: default_send_timeout_secs(),
            teardown_timeout_secs: default_teardown_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            log_level: default_log_level(),
        }
    }
}

/// `[media]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MediaSection {
    #[serde(default = "default_source")]
    pub source: PathBuf,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default)]
    pub ice_servers: Vec<String>,
}

impl Default for MediaSection {
    fn default() -> Self {
        Self {
            source: default_source(),
            width: default_width(),
            height: default_height(),
            framerate: default_framerate(),
            ice_servers: Vec::new(),
        }
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_static_dir() -> PathBuf {
    ServerConfig::default().static_dir
}
fn default_send_timeout_secs() -> u64 {
    5
}
fn default_teardown_timeout_secs() -> u64 {
    5
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_source() -> PathBuf {
    MediaConfig::default().source
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_framerate() -> u32 {
    30
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ConfigFile {
    /// Parses TOML text.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Parse`] for malformed TOML or wrongly typed fields.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Converts to the runtime configuration.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] when `bind_address` is not an IP.
    pub fn into_server_config(self) -> Result<ServerConfig, ConfigError> {
        let ip: IpAddr =
            self.server
                .bind_address
                .parse()
                .map_err(|source| ConfigError::InvalidAddress {
                    value: self.server.bind_address.clone(),
                    source,
                })?;

        Ok(ServerConfig {
            bind_addr: SocketAddr::new(ip, self.server.port),
            static_dir: self.server.static_dir,
            send_timeout: Duration::from_secs(self.server.send_timeout_secs),
            teardown_timeout: Duration::from_secs(self.server.teardown_timeout_secs),
            shutdown_grace: Duration::from_secs(self.server.shutdown_grace_secs),
            log_level: self.server.log_level,
            media: MediaConfig {
                width: self.media.width,
                height: self.media.height,
                framerate: self.media.framerate,
                source: self.media.source,
                ice_servers: self.media.ice_servers,
            },
        })
    }
}

/// Reads and parses the configuration file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read (including when it does not
/// exist), [`ConfigError::Parse`] if it is not valid.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    ConfigFile::from_toml(&text)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
