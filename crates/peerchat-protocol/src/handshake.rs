//! Messages exchanged before a session key exists.
//!
//! The initiator sends one [`Hello`]; the responder answers with one
//! [`HelloReply`]. Both travel as plaintext JSON inside a frame.

use peerchat_types::{PeerChatError, PeerId, Result};
use serde::{Deserialize, Serialize};

/// First message on every new connection, sent by the initiator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    /// Initiator's username, used as its peer id on the responder.
    pub username: String,
    /// Initiator's PEM-encoded P-384 public key.
    pub pubkey: String,
}

/// Responder's answer to a [`Hello`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloReply {
    /// Responder's PEM-encoded P-384 public key.
    pub pubkey: String,
    /// Responder's username. Older nodes omit it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl Hello {
    /// Serializes the hello for framing.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        encode(self, "hello")
    }

    /// Parses and sanity-checks a received hello.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let hello: Self = decode(bytes, "hello")?;
        check_username(&hello.username)?;
        if hello.pubkey.is_empty() {
            return Err(PeerChatError::HandshakeError {
                reason: "hello carries an empty public key".into(),
            });
        }
        Ok(hello)
    }
}

impl HelloReply {
    /// Serializes the reply for framing.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        encode(self, "reply")
    }

    /// Parses a received reply and checks its username, if any.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let mut reply: Self = decode(bytes, "reply")?;
        // A blank name counts as absent.
        reply.username = reply.username.filter(|u| !u.trim().is_empty());
        if let Some(name) = &reply.username {
            check_username(name)?;
        }
        if reply.pubkey.is_empty() {
            return Err(PeerChatError::HandshakeError {
                reason: "reply carries an empty public key".into(),
            });
        }
        Ok(reply)
    }
}

/// Remote usernames become peer ids and history file names.
fn check_username(name: &str) -> Result<()> {
    PeerId::check_name(name).map_err(|e| PeerChatError::HandshakeError {
        reason: format!("unusable username: {e}"),
    })
}

fn encode<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| PeerChatError::ProtocolError {
        reason: format!("{what} encoding failed: {e}"),
    })
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8], what: &str) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| PeerChatError::HandshakeError {
        reason: format!("malformed {what}: {e}"),
    })
}
