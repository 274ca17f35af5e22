//! Application configuration with sensible defaults.
//!
//! Every operational parameter of the node lives here. Defaults match
//! the values the chat protocol was designed around (discovery on UDP
//! 9999 every 30 seconds, one message per peer per second, 1 KiB file
//! chunks).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{PeerChatError, PeerId, Result};

/// Default UDP port for discovery announcements.
pub const DEFAULT_DISCOVERY_PORT: u16 = 9999;

/// Default TCP port for peer connections.
pub const DEFAULT_P2P_PORT: u16 = 6000;

/// Upper bound accepted for `file_chunk_size`.
///
/// A hex-encoded chunk plus envelope overhead must fit in one frame.
pub const MAX_FILE_CHUNK_SIZE: usize = 64 * 1024;

/// Global application configuration.
///
/// Missing fields in a config file fall back to [`AppConfig::default`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Local username, announced in hellos and discovery datagrams.
    pub username: String,

    /// Address the peer listener binds to.
    pub listen_addr: SocketAddr,

    /// Whether the discovery broadcaster and listener run at all.
    pub discovery_enabled: bool,

    /// Address the discovery listener binds to.
    pub discovery_bind: SocketAddr,

    /// Destination of discovery announcements.
    pub discovery_target: SocketAddr,

    /// Seconds between two discovery announcements.
    pub discovery_interval_secs: u64,

    /// Per-peer outbound rate-limit window in milliseconds.
    pub rate_limit_window_ms: u64,

    /// Bytes of file content carried per chunk envelope.
    pub file_chunk_size: usize,

    /// Largest frame payload accepted from an established session.
    pub max_frame_len: usize,

    /// Seconds a handshake may take before the connection is dropped.
    pub handshake_timeout_secs: u64,

    /// Seconds a single frame write may stall before the peer is skipped.
    pub send_timeout_secs: u64,

    /// Additional attempts for an outbound connect after the first fails.
    pub connect_retries: u32,

    /// Linear backoff step between connect attempts, in milliseconds.
    pub connect_backoff_ms: u64,

    /// Directory holding per-peer encrypted history files.
    pub history_dir: PathBuf,

    /// Directory where received files are reassembled.
    pub download_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            username: "anonymous".into(),
            listen_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_P2P_PORT)),
            discovery_enabled: true,
            discovery_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_DISCOVERY_PORT)),
            discovery_target: SocketAddr::from(([255, 255, 255, 255], DEFAULT_DISCOVERY_PORT)),
            discovery_interval_secs: 30,
            rate_limit_window_ms: 1000,
            file_chunk_size: 1024,
            max_frame_len: 1024 * 1024,
            handshake_timeout_secs: 10,
            send_timeout_secs: 5,
            connect_retries: 2,
            connect_backoff_ms: 500,
            history_dir: PathBuf::from("history"),
            download_dir: PathBuf::from("."),
        }
    }
}

impl AppConfig {
    /// Validates all configuration values.
    ///
    /// Returns [`PeerChatError::ConfigError`] naming the first field
    /// that is out of range.
    pub fn validate(&self) -> Result<()> {
        PeerId::check_name(&self.username).map_err(|reason| PeerChatError::ConfigError { reason })?;

        if self.discovery_interval_secs == 0 {
            return Err(PeerChatError::ConfigError {
                reason: "discovery_interval_secs must be greater than 0".into(),
            });
        }

        if self.file_chunk_size == 0 || self.file_chunk_size > MAX_FILE_CHUNK_SIZE {
            return Err(PeerChatError::ConfigError {
                reason: format!("file_chunk_size must be 1..={MAX_FILE_CHUNK_SIZE}"),
            });
        }

        // Hex doubles the chunk; leave room for the JSON wrapper and AEAD overhead.
        if self.max_frame_len < self.file_chunk_size * 2 + 1024 {
            return Err(PeerChatError::ConfigError {
                reason: "max_frame_len too small for the configured file_chunk_size".into(),
            });
        }

        if self.handshake_timeout_secs == 0 {
            return Err(PeerChatError::ConfigError {
                reason: "handshake_timeout_secs must be greater than 0".into(),
            });
        }

        if self.send_timeout_secs == 0 {
            return Err(PeerChatError::ConfigError {
                reason: "send_timeout_secs must be greater than 0".into(),
            });
        }

        Ok(())
    }

    /// Rate-limit window as a [`Duration`].
    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Discovery interval as a [`Duration`].
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_secs(self.discovery_interval_secs)
    }

    /// Handshake timeout as a [`Duration`].
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    /// Per-write send timeout as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    /// Backoff step between connect attempts.
    pub fn connect_backoff(&self) -> Duration {
        Duration::from_millis(self.connect_backoff_ms)
    }
}
