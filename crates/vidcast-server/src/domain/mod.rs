//! Domain layer for vidcast-server: plain configuration types, no I/O.

pub mod config;

pub use config::{MediaConfig, ServerConfig, DEFAULT_PORT};
