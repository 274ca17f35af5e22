//! Peerchat node runtime.
//!
//! Wires the transport, history log, received-file sink, broadcast
//! router and discovery service together behind a command/event
//! channel API. See [`node::Node`] for the entry point.

pub mod command;
pub mod event_loop;
pub mod file_transfer;
pub mod incoming;
pub mod node;
pub mod rate_limiter;
pub mod router;
