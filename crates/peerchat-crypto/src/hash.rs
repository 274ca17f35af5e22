//! SHA-256 digests and public-key fingerprints.

use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Returns the lowercase hex SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// Fingerprint of a serialized public key, for display to the user.
///
/// Identical key bytes always give identical fingerprints. Nothing in
/// the node enforces or pins fingerprints.
pub fn fingerprint(public_key_bytes: &[u8]) -> String {
    sha256_hex(public_key_bytes)
}

/// Incremental SHA-256 over a stream of chunks.
///
/// Used by file transfer to digest a file while it is read in chunks.
#[derive(Clone, Default)]
pub struct StreamingSha256(Sha256);

impl StreamingSha256 {
    /// Starts an empty digest.
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    /// Feeds more bytes into the digest.
    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    /// Consumes the hasher and returns the lowercase hex digest.
    pub fn finalize_hex(self) -> String {
        hex::encode(self.0.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_deterministic() {
        assert_eq!(fingerprint(b"key-a"), fingerprint(b"key-a"));
        assert_ne!(fingerprint(b"key-a"), fingerprint(b"key-b"));
        assert_eq!(fingerprint(b"key-a").len(), 64);
    }

    #[test]
    fn streaming_matches_one_shot() {
        let mut s = StreamingSha256::new();
        s.update(b"hello ");
        s.update(b"world");
        assert_eq!(s.finalize_hex(), sha256_hex(b"hello world"));
    }
}
