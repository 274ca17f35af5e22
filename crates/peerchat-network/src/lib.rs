//! Peer-to-peer networking for the peerchat node.
//!
//! Every node is at once a TCP server accepting peers and a client
//! dialing them. Each connection runs a one-shot key-exchange
//! handshake and then becomes a [`session::Session`] with its own
//! receive loop.
//!
//! # Architecture
//!
//! - [`config`]: network configuration derived from `AppConfig`
//! - [`handshake`]: hello/reply exchange and its state machine
//! - [`session`]: one established, encrypted peer connection
//! - [`registry`]: peer id to live session map
//! - [`receiver`]: per-session read/decrypt/dispatch loop
//! - [`transport`]: accept loop, outbound connect, session set-up
//! - [`fingerprints`]: first-seen public key fingerprints
//! - [`discovery`]: UDP broadcast announcer and listener
//! - [`events`]: events delivered to the node event loop

pub mod config;
pub mod discovery;
pub mod events;
pub mod fingerprints;
pub mod handshake;
pub mod receiver;
pub mod registry;
pub mod session;
pub mod transport;
