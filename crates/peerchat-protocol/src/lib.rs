//! Wire formats spoken between peerchat nodes.
//!
//! # Modules
//!
//! - [`envelope`]: JSON chat/file envelopes carried inside sealed frames
//! - [`sealed`]: envelope encryption with a per-peer session key
//! - [`framing`]: `u32` big-endian length-prefixed frames
//! - [`handshake`]: hello / reply messages exchanged before a session exists
//! - [`discovery`]: LAN announcement datagrams

pub mod discovery;
pub mod envelope;
pub mod framing;
pub mod handshake;
pub mod sealed;
