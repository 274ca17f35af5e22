//! Envelopes: the plaintext unit carried inside one sealed frame.
//!
//! On the wire an envelope is a JSON object tagged by `"type"`:
//!
//! ```text
//! {"type":"msg","sender":"alice","msg":"hi","private":"bob","ts":1700000000.5}
//! {"type":"file","name":"notes.txt","chunk":"48656c6c6f"}
//! {"type":"file_end","name":"notes.txt","chunks":3,"size":2500,"sha256":"..."}
//! ```
//!
//! `private` is omitted (or `null`) for broadcasts. File chunk bytes are
//! hex encoded.

use std::time::{SystemTime, UNIX_EPOCH};

use peerchat_types::{PeerChatError, Result};
use serde::{Deserialize, Serialize};

/// Plaintext payload exchanged between two established peers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
    /// A chat line.
    #[serde(rename = "msg")]
    Message {
        /// Username of the author.
        sender: String,
        /// Message body.
        #[serde(rename = "msg")]
        text: String,
        /// Recipient username, or `None` for everyone.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        private: Option<String>,
        /// Author's clock in seconds since the Unix epoch.
        ts: f64,
    },

    /// One slice of a file, in order.
    #[serde(rename = "file")]
    FileChunk {
        /// Base name of the file being sent.
        name: String,
        /// Raw chunk bytes.
        #[serde(with = "hex_bytes")]
        chunk: Vec<u8>,
    },

    /// Marks the end of a file transfer.
    #[serde(rename = "file_end")]
    FileEnd {
        /// Base name of the file being sent.
        name: String,
        /// Number of chunk envelopes sent before this marker.
        chunks: u64,
        /// Total file size in bytes.
        size: u64,
        /// Lowercase hex SHA-256 of the whole file.
        sha256: String,
    },
}

impl Envelope {
    /// Builds a chat message stamped with the current time.
    pub fn message(sender: impl Into<String>, text: impl Into<String>, private: Option<String>) -> Self {
        Self::Message {
            sender: sender.into(),
            text: text.into(),
            private,
            ts: unix_now(),
        }
    }

    /// Recipient restriction carried by the envelope, if any.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::Message { private, .. } => private.as_deref(),
            Self::FileChunk { .. } | Self::FileEnd { .. } => None,
        }
    }

    /// Whether a node named `local_username` should surface this envelope.
    ///
    /// Envelopes without a recipient restriction are visible to everyone.
    pub fn is_addressed_to(&self, local_username: &str) -> bool {
        match self.recipient() {
            Some(recipient) => recipient == local_username,
            None => true,
        }
    }

    /// Short tag used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message { .. } => "msg",
            Self::FileChunk { .. } => "file",
            Self::FileEnd { .. } => "file_end",
        }
    }

    /// Serializes the envelope to its JSON wire form.
    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| PeerChatError::ProtocolError {
            reason: format!("envelope encoding failed: {e}"),
        })
    }

    /// Parses an envelope from its JSON wire form.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| PeerChatError::ProtocolError {
            reason: format!("malformed envelope: {e}"),
        })
    }
}

/// Seconds since the Unix epoch as a float, matching the `ts` field.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_wire_shape() -> Result<()> {
        let env = Envelope::Message {
            sender: "alice".into(),
            text: "hi".into(),
            private: None,
            ts: 1.5,
        };
        let json: serde_json::Value = serde_json::from_slice(&env.to_json()?)
            .map_err(|e| PeerChatError::ProtocolError { reason: e.to_string() })?;
        assert_eq!(json["type"], "msg");
        assert_eq!(json["msg"], "hi");
        assert_eq!(json["sender"], "alice");
        assert!(json.get("private").is_none());
        Ok(())
    }

    #[test]
    fn null_private_is_broadcast() -> Result<()> {
        let env = Envelope::from_json(br#"{"type":"msg","sender":"a","msg":"x","private":null,"ts":2.0}"#)?;
        assert_eq!(env.recipient(), None);
        assert!(env.is_addressed_to("anyone"));
        Ok(())
    }

    #[test]
    fn private_message_visibility() {
        let env = Envelope::message("alice", "psst", Some("bob".into()));
        assert!(env.is_addressed_to("bob"));
        assert!(!env.is_addressed_to("carol"));
    }

    #[test]
    fn file_chunk_is_hex_on_the_wire() -> Result<()> {
        let env = Envelope::FileChunk {
            name: "a.bin".into(),
            chunk: vec![0xde, 0xad, 0xbe, 0xef],
        };
        let text = String::from_utf8(env.to_json()?).map_err(|e| PeerChatError::ProtocolError {
            reason: e.to_string(),
        })?;
        assert!(text.contains(r#""chunk":"deadbeef""#));
        assert!(text.contains(r#""type":"file""#));
        assert_eq!(Envelope::from_json(text.as_bytes())?, env);
        Ok(())
    }

    #[test]
    fn bad_hex_chunk_rejected() {
        let res = Envelope::from_json(br#"{"type":"file","name":"a","chunk":"zz"}"#);
        assert!(matches!(res, Err(PeerChatError::ProtocolError { .. })));
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(Envelope::from_json(br#"{"type":"ping"}"#).is_err());
    }

    #[test]
    fn message_timestamp_is_current() {
        let env = Envelope::message("a", "b", None);
        match env {
            Envelope::Message { ts, .. } => assert!(ts > 1_600_000_000.0),
            other => panic!("unexpected envelope {other:?}"),
        }
    }
}
