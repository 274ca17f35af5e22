//! Envelope encryption with a per-peer session key.
//!
//! A sealed envelope is `nonce(12) || AES-256-GCM(json(envelope))`.
//! Anything that fails to open, whether a bad tag, a short blob, or
//! plaintext that is not a valid envelope, is reported as an
//! authentication failure so the receive loop treats all three alike.

use peerchat_crypto::aead;
use peerchat_crypto::ecdh::SessionKey;
use peerchat_types::{PeerChatError, Result};

use crate::envelope::Envelope;

/// Serializes and encrypts `envelope` under `key`.
pub fn seal_envelope(key: &SessionKey, envelope: &Envelope) -> Result<Vec<u8>> {
    let plaintext = envelope.to_json()?;
    aead::seal(key.as_bytes(), &plaintext)
}

/// Decrypts and parses a blob produced by [`seal_envelope`].
///
/// # Errors
///
/// [`PeerChatError::AuthenticationError`] on any failure.
pub fn open_envelope(key: &SessionKey, blob: &[u8]) -> Result<Envelope> {
    let plaintext = aead::open(key.as_bytes(), blob)?;
    Envelope::from_json(&plaintext).map_err(|e| PeerChatError::AuthenticationError {
        reason: format!("decrypted payload is not an envelope: {e}"),
    })
}
