//! Cryptographic primitives for the peerchat node.
//!
//! This crate is the only place in the workspace that touches raw
//! cryptography.
//!
//! # Modules
//!
//! - [`identity`]: long-term NIST P-384 key pair and PEM encoding
//! - [`ecdh`]: P-384 key agreement and session-key derivation
//! - [`hkdf`]: HKDF-SHA256 into fixed-size key buffers
//! - [`aead`]: AES-256-GCM sealing with a random 96-bit nonce prefix
//! - [`hash`]: SHA-256 digests and public-key fingerprints

pub mod aead;
pub mod ecdh;
pub mod hash;
pub mod hkdf;
pub mod identity;
