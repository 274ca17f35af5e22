//! Core shared types for the peerchat node.
//!
//! This crate defines the identifiers, events, and the error enum used
//! across the workspace. Crates convert their internal failures into
//! [`PeerChatError`] so the node has a single error surface.

pub mod config;

use std::fmt;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// PeerId
// ---------------------------------------------------------------------------

/// Longest username accepted, in bytes.
pub const MAX_USERNAME_LEN: usize = 64;

/// Name under which a remote peer is known to this node.
///
/// Peers identify themselves by username during the handshake. The
/// registry, the rate limiter, and the history log are all keyed by
/// this value.
#[derive(Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a new `PeerId` from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Checks that `name` can be used as a username.
    ///
    /// A username names the peer's history file, so it must be a single
    /// plain path component: not blank, no surrounding whitespace, no
    /// path separators or control characters, not `.` or `..`, and at
    /// most [`MAX_USERNAME_LEN`] bytes.
    pub fn check_name(name: &str) -> std::result::Result<(), String> {
        if name.trim().is_empty() {
            return Err("username must not be empty".into());
        }
        if name.trim() != name {
            return Err(format!("username '{name}' has surrounding whitespace"));
        }
        if name.len() > MAX_USERNAME_LEN {
            return Err(format!("username is longer than {MAX_USERNAME_LEN} bytes"));
        }
        if name == "." || name == ".." {
            return Err(format!("username '{name}' is reserved"));
        }
        if name.chars().any(|c| c.is_control() || matches!(c, '/' | '\\')) {
            return Err(format!("username {name:?} contains a path separator or control character"));
        }
        Ok(())
    }
}

impl From<&str> for PeerId {
    fn from(name: &str) -> Self {
        Self(name.to_owned())
    }
}

impl From<String> for PeerId {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// SessionId
// ---------------------------------------------------------------------------

/// Process-unique identifier of one established session.
///
/// A reconnecting peer gets a fresh `SessionId`, which lets a receive
/// loop that outlived its session recognise that the registry entry
/// now belongs to somebody else.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct SessionId(u64);

impl SessionId {
    /// Creates a `SessionId` from a raw counter value.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// NodeEvent
// ---------------------------------------------------------------------------

/// Events emitted by the node core to the front-end.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum NodeEvent {
    /// A handshake completed and the peer is now registered.
    PeerJoined {
        /// Registered peer name.
        peer: PeerId,
        /// SHA-256 fingerprint of the peer's public key.
        fingerprint: String,
        /// `true` when the remote side initiated the connection.
        inbound: bool,
    },
    /// A session ended. Emitted once per terminated session.
    PeerLeft {
        /// Peer whose session was removed.
        peer: PeerId,
    },
    /// A chat message addressed to this node (or to everyone) arrived.
    MessageReceived {
        /// Session the message arrived on.
        peer: PeerId,
        /// Sender name carried inside the envelope.
        sender: String,
        /// Message body.
        text: String,
        /// `true` when the message was addressed to this node only.
        private: bool,
        /// Sender clock, seconds since the Unix epoch.
        timestamp: f64,
    },
    /// A public key fingerprint was seen for the first time.
    FingerprintSeen {
        /// Peer presenting the key.
        peer: PeerId,
        /// Hex SHA-256 of the serialized public key.
        fingerprint: String,
    },
    /// Another node announced itself on the local network.
    PeerDiscovered {
        /// Announced username.
        username: String,
        /// Source address of the announcement datagram.
        address: IpAddr,
        /// Advertised peer-to-peer listening port.
        port: u16,
    },
    /// A file transfer finished (end marker received).
    FileReceived {
        /// Sending peer.
        peer: PeerId,
        /// Sanitized file name.
        name: String,
        /// Location of the reassembled file.
        path: PathBuf,
        /// Bytes written for this transfer.
        size: u64,
        /// `true` when chunk count, size, and digest all matched.
        verified: bool,
    },
    /// A local broadcast was handed to the router.
    BroadcastSent {
        /// Message body.
        text: String,
        /// Number of peers the message was written to.
        delivered: usize,
    },
}

// ---------------------------------------------------------------------------
// PeerChatError
// ---------------------------------------------------------------------------

/// Central error type for the peerchat node.
///
/// All crates in the workspace convert their internal errors into
/// variants of this enum.
#[derive(Debug, Error)]
pub enum PeerChatError {
    /// The handshake could not be completed.
    #[error("handshake error: {reason}")]
    HandshakeError {
        /// Human-readable description of the handshake failure.
        reason: String,
    },

    /// A sealed blob failed authentication or could not be parsed.
    #[error("authentication error: {reason}")]
    AuthenticationError {
        /// Human-readable description of the failure.
        reason: String,
    },

    /// A socket operation failed, timed out, or the peer went away.
    #[error("transport error: {reason}")]
    TransportError {
        /// Human-readable description of the transport failure.
        reason: String,
    },

    /// A configuration value is invalid or missing.
    #[error("config error: {reason}")]
    ConfigError {
        /// Human-readable description of the configuration problem.
        reason: String,
    },

    /// A filesystem operation failed.
    #[error("io error: {reason}")]
    IoError {
        /// Human-readable description of the IO failure.
        reason: String,
    },

    /// Encoding or decoding of a wire structure failed.
    #[error("protocol error: {reason}")]
    ProtocolError {
        /// Human-readable description of the protocol failure.
        reason: String,
    },

    /// Key parsing, key agreement, or key derivation failed.
    #[error("crypto error: {reason}")]
    CryptoError {
        /// Human-readable description of the cryptographic failure.
        reason: String,
    },

    /// A send was dropped because the peer's window is still open.
    #[error("rate limited: {reason}")]
    RateLimited {
        /// Human-readable description including peer and window.
        reason: String,
    },

    /// No live session exists for the requested peer.
    #[error("unknown peer: {peer}")]
    UnknownPeer {
        /// The peer that was looked up.
        peer: PeerId,
    },
}

impl From<std::io::Error> for PeerChatError {
    fn from(e: std::io::Error) -> Self {
        Self::IoError {
            reason: e.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result alias
// ---------------------------------------------------------------------------

/// Convenience result type using [`PeerChatError`].
pub type Result<T> = std::result::Result<T, PeerChatError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
