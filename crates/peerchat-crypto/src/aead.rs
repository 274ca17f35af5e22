//! AES-256-GCM authenticated encryption.
//!
//! Every sealed blob is laid out as `nonce(12) || ciphertext || tag(16)`.
//! Nonces come from OS entropy and are never reused on purpose; the
//! 96-bit space is ample for the message volume of a chat session.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use peerchat_types::{PeerChatError, Result};
use rand::rngs::OsRng;
use rand::RngCore;

/// Byte length of the AES-GCM nonce prefix.
pub const NONCE_LEN: usize = 12;

/// Byte length of the GCM authentication tag.
pub const TAG_LEN: usize = 16;

/// Generates a fresh random 96-bit nonce.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Encrypts `plaintext` under `key` and returns `nonce || ciphertext`.
///
/// # Errors
///
/// [`PeerChatError::CryptoError`] if the cipher rejects the input.
pub fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    seal_with_nonce(key, &generate_nonce(), plaintext)
}

/// Like [`seal`] with a caller-chosen nonce. Tests only need this.
pub fn seal_with_nonce(key: &[u8; 32], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| PeerChatError::CryptoError {
        reason: format!("invalid AES-256 key: {e}"),
    })?;

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| PeerChatError::CryptoError {
            reason: format!("AES-256-GCM encryption failed: {e}"),
        })?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Splits `blob` into nonce and ciphertext and decrypts it.
///
/// # Errors
///
/// [`PeerChatError::AuthenticationError`] if the blob is shorter than
/// a nonce plus tag, or if tag verification fails (wrong key or
/// tampered bytes).
pub fn open(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN + TAG_LEN {
        return Err(PeerChatError::AuthenticationError {
            reason: format!("sealed blob too short: {} bytes", blob.len()),
        });
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|e| PeerChatError::CryptoError {
        reason: format!("invalid AES-256 key: {e}"),
    })?;

    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| PeerChatError::AuthenticationError {
            reason: "AES-256-GCM tag verification failed".into(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_roundtrip() -> std::result::Result<(), PeerChatError> {
        let key = [0x42u8; 32];
        let blob = seal(&key, b"hello peers")?;
        assert_eq!(blob.len(), NONCE_LEN + b"hello peers".len() + TAG_LEN);
        assert_eq!(open(&key, &blob)?, b"hello peers");
        Ok(())
    }

    #[test]
    fn nonces_differ_between_calls() -> std::result::Result<(), PeerChatError> {
        let key = [0x01u8; 32];
        let a = seal(&key, b"same")?;
        let b = seal(&key, b"same")?;
        assert_ne!(a[..NONCE_LEN], b[..NONCE_LEN]);
        Ok(())
    }

    #[test]
    fn wrong_key_is_authentication_error() -> std::result::Result<(), PeerChatError> {
        let blob = seal(&[0x42u8; 32], b"secret")?;
        let err = open(&[0x43u8; 32], &blob);
        assert!(matches!(err, Err(PeerChatError::AuthenticationError { .. })));
        Ok(())
    }

    #[test]
    fn flipped_byte_is_authentication_error() -> std::result::Result<(), PeerChatError> {
        let key = [9u8; 32];
        let mut blob = seal(&key, b"payload")?;
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        assert!(matches!(open(&key, &blob), Err(PeerChatError::AuthenticationError { .. })));
        Ok(())
    }

    #[test]
    fn short_blob_rejected() {
        let err = open(&[0u8; 32], &[0u8; NONCE_LEN + TAG_LEN - 1]);
        assert!(matches!(err, Err(PeerChatError::AuthenticationError { .. })));
    }

    #[test]
    fn empty_plaintext_is_tag_only() -> std::result::Result<(), PeerChatError> {
        let key = [3u8; 32];
        let blob = seal(&key, b"")?;
        assert_eq!(blob.len(), NONCE_LEN + TAG_LEN);
        assert!(open(&key, &blob)?.is_empty());
        Ok(())
    }
}
