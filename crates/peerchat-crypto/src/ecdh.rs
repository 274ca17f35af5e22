//! P-384 Elliptic-Curve Diffie-Hellman and session-key derivation.
//!
//! The session key for a pair of nodes is
//! `HKDF-SHA256(ikm = ECDH(local, remote), salt = none, info = "p2p-chat")`
//! truncated to 32 bytes. Both sides compute the same value.

use p384::{PublicKey, SecretKey};
use peerchat_types::{PeerChatError, Result};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::hkdf;

/// HKDF info string binding derived keys to this protocol.
pub const SESSION_KEY_INFO: &[u8] = b"p2p-chat";

/// Length of the derived AES-256 key.
pub const SESSION_KEY_LEN: usize = 32;

// ---------------------------------------------------------------------------
// SessionKey
// ---------------------------------------------------------------------------

/// 256-bit symmetric key shared with one peer. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; SESSION_KEY_LEN]);

impl SessionKey {
    /// Wraps raw key bytes.
    pub fn from_bytes(bytes: [u8; SESSION_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_LEN] {
        &self.0
    }
}

impl PartialEq for SessionKey {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SessionKey {}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionKey(..)")
    }
}

// ---------------------------------------------------------------------------
// Derivation
// ---------------------------------------------------------------------------

/// Computes the raw ECDH shared secret (48 bytes for P-384).
pub fn shared_secret(local: &SecretKey, remote: &PublicKey) -> Vec<u8> {
    let shared = p384::ecdh::diffie_hellman(local.to_nonzero_scalar(), remote.as_affine());
    shared.raw_secret_bytes().to_vec()
}

/// Derives the 256-bit session key shared by `local` and `remote`.
///
/// # Errors
///
/// [`PeerChatError::CryptoError`] if HKDF expansion fails.
pub fn derive_session_key(local: &SecretKey, remote: &PublicKey) -> Result<SessionKey> {
    let ikm = Zeroizing::new(shared_secret(local, remote));
    let okm = hkdf::derive::<SESSION_KEY_LEN>(&ikm, None, SESSION_KEY_INFO)?;
    Ok(SessionKey(*okm))
}
