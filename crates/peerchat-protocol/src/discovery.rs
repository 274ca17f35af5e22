//! LAN discovery announcement datagram.
//!
//! Each node periodically broadcasts `{"user": <username>, "port": <p2p port>}`
//! as a single UDP datagram. Announcements are unauthenticated.

use peerchat_types::{PeerChatError, Result};
use serde::{Deserialize, Serialize};

/// Largest datagram the listener reads.
pub const MAX_ANNOUNCEMENT_LEN: usize = 1024;

/// One discovery announcement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// Announcing node's username.
    #[serde(rename = "user")]
    pub username: String,
    /// TCP port the announcing node accepts peer connections on.
    #[serde(rename = "port")]
    pub p2p_port: u16,
}

impl Announcement {
    /// Serializes the announcement as a datagram payload.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PeerChatError::ProtocolError {
            reason: format!("announcement encoding failed: {e}"),
        })
    }

    /// Parses a received datagram.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let ann: Self = serde_json::from_slice(bytes).map_err(|e| PeerChatError::ProtocolError {
            reason: format!("malformed announcement: {e}"),
        })?;
        if ann.username.is_empty() {
            return Err(PeerChatError::ProtocolError {
                reason: "announcement has an empty username".into(),
            });
        }
        Ok(ann)
    }
}
