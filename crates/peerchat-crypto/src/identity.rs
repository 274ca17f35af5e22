//! Long-term node identity on NIST P-384.
//!
//! One [`Identity`] is generated per process at start-up and never
//! persisted. Its public half travels in handshakes as a PEM-encoded
//! SubjectPublicKeyInfo document; the exact PEM bytes are what gets
//! fingerprinted.

use std::fmt;

use p384::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use p384::{PublicKey, SecretKey};
use peerchat_types::{PeerChatError, Result};
use rand::rngs::OsRng;

use crate::ecdh::{self, SessionKey};
use crate::hash;

/// The local key pair.
pub struct Identity {
    secret: SecretKey,
    public_pem: String,
    fingerprint: String,
}

impl Identity {
    /// Generates a fresh P-384 key pair from OS entropy.
    ///
    /// # Errors
    ///
    /// [`PeerChatError::CryptoError`] if the public key cannot be
    /// encoded as PEM.
    pub fn generate() -> Result<Self> {
        Self::from_secret(SecretKey::random(&mut OsRng))
    }

    /// Wraps an existing secret key.
    pub fn from_secret(secret: SecretKey) -> Result<Self> {
        let public_pem = encode_public_key(&secret.public_key())?;
        let fingerprint = hash::fingerprint(public_pem.as_bytes());
        Ok(Self {
            secret,
            public_pem,
            fingerprint,
        })
    }

    /// Serialized public key exactly as sent on the wire.
    pub fn public_key_bytes(&self) -> &[u8] {
        self.public_pem.as_bytes()
    }

    /// PEM text of the public key.
    pub fn public_key_pem(&self) -> &str {
        &self.public_pem
    }

    /// Hex SHA-256 of [`public_key_bytes`](Self::public_key_bytes).
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Derives the session key shared with the holder of `remote_pem`.
    ///
    /// # Errors
    ///
    /// [`PeerChatError::CryptoError`] if `remote_pem` is not a valid
    /// P-384 public key.
    pub fn session_key_with(&self, remote_pem: &[u8]) -> Result<SessionKey> {
        let remote = decode_public_key(remote_pem)?;
        ecdh::derive_session_key(&self.secret, &remote)
    }
}

// The secret scalar never appears in logs.
impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Encodes a public key as a PEM SubjectPublicKeyInfo document.
pub fn encode_public_key(public: &PublicKey) -> Result<String> {
    public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| PeerChatError::CryptoError {
            reason: format!("public key PEM encoding failed: {e}"),
        })
}

/// Parses a PEM SubjectPublicKeyInfo document into a P-384 public key.
pub fn decode_public_key(pem: &[u8]) -> Result<PublicKey> {
    let text = std::str::from_utf8(pem).map_err(|_| PeerChatError::CryptoError {
        reason: "public key is not valid UTF-8".into(),
    })?;
    PublicKey::from_public_key_pem(text.trim()).map_err(|e| PeerChatError::CryptoError {
        reason: format!("invalid P-384 public key: {e}"),
    })
}
