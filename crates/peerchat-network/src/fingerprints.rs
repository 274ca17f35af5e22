//! Trust-on-first-use bookkeeping for peer key fingerprints.
//!
//! The book only remembers which fingerprints have been shown to the
//! user. It never rejects a key.

use std::collections::HashSet;
use std::sync::Mutex;

/// Set of fingerprints already reported.
#[derive(Default)]
pub struct FingerprintBook {
    seen: Mutex<HashSet<String>>,
}

impl FingerprintBook {
    /// Creates an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `fingerprint`; returns `true` the first time it is seen.
    pub fn observe(&self, fingerprint: &str) -> bool {
        match self.seen.lock() {
            Ok(mut seen) => seen.insert(fingerprint.to_string()),
            // Poisoned: keep using the inner set.
            Err(poisoned) => poisoned.into_inner().insert(fingerprint.to_string()),
        }
    }

    /// Number of distinct fingerprints recorded.
    pub fn len(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Returns `true` if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sighting_only() {
        let book = FingerprintBook::new();
        assert!(book.observe("aa"));
        assert!(!book.observe("aa"));
        assert!(book.observe("bb"));
        assert_eq!(book.len(), 2);
    }
}
