//! Network-layer configuration.
//!
//! Built from the shared `AppConfig`; kept separate so the transport
//! only sees the knobs it actually uses.

use std::net::SocketAddr;
use std::time::Duration;

use peerchat_protocol::framing::MAX_FRAME_LEN;
use peerchat_types::config::AppConfig;

/// Settings for sessions, handshakes, and discovery.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Local username sent in hellos, replies, and announcements.
    pub username: String,
    /// Address the accept loop binds to.
    pub listen_addr: SocketAddr,
    /// Largest frame accepted on an established session.
    pub max_frame_len: usize,
    /// Deadline for the whole handshake exchange.
    pub handshake_timeout: Duration,
    /// Extra outbound connect attempts after the first failure.
    pub connect_retries: u32,
    /// Linear backoff step between connect attempts.
    pub connect_backoff: Duration,
    /// Whether discovery tasks run.
    pub discovery_enabled: bool,
    /// Bind address of the discovery listener.
    pub discovery_bind: SocketAddr,
    /// Destination of discovery announcements.
    pub discovery_target: SocketAddr,
    /// Gap between announcements.
    pub discovery_interval: Duration,
}

impl NetworkConfig {
    /// Extracts the network settings from the application config.
    pub fn from_app(app: &AppConfig) -> Self {
        Self {
            username: app.username.clone(),
            listen_addr: app.listen_addr,
            max_frame_len: app.max_frame_len,
            handshake_timeout: app.handshake_timeout(),
            connect_retries: app.connect_retries,
            connect_backoff: app.connect_backoff(),
            discovery_enabled: app.discovery_enabled,
            discovery_bind: app.discovery_bind,
            discovery_target: app.discovery_target,
            discovery_interval: app.discovery_interval(),
        }
    }

    /// Loopback settings with discovery off, for tests.
    pub fn local(username: &str) -> Self {
        Self {
            username: username.to_string(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            max_frame_len: MAX_FRAME_LEN,
            handshake_timeout: Duration::from_secs(5),
            connect_retries: 0,
            connect_backoff: Duration::from_millis(50),
            discovery_enabled: false,
            discovery_bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            discovery_target: SocketAddr::from(([127, 0, 0, 1], 9999)),
            discovery_interval: Duration::from_secs(30),
        }
    }
}
