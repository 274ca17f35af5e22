//! HKDF-SHA256 (RFC 5869) into fixed-size buffers.
//!
//! The ECDH layer uses this to turn the raw P-384 shared secret into a
//! session key. The derived bytes are wiped when the returned buffer
//! goes out of scope.

use hkdf::Hkdf;
use peerchat_types::{PeerChatError, Result};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Derives `N` bytes of key material from `ikm`.
///
/// `salt = None` is the RFC's all-zero salt. Fails only when `N`
/// exceeds what HKDF-SHA256 can expand (8160 bytes).
pub fn derive<const N: usize>(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> Result<Zeroizing<[u8; N]>> {
    let mut okm = Zeroizing::new([0u8; N]);
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, okm.as_mut_slice())
        .map_err(|e| PeerChatError::CryptoError {
            reason: format!("cannot expand {N} bytes: {e}"),
        })?;
    Ok(okm)
}
