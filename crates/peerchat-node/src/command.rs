//! Commands and status types for front-end → node communication.
//!
//! [`NodeCommand`] is the bounded-channel message type the daemon and
//! tests use to drive the node. Each command that produces a result
//! carries a `tokio::sync::oneshot::Sender` for the reply.

use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use peerchat_types::{PeerId, Result, SessionId};
use tokio::sync::oneshot;

use crate::file_transfer::FileSendReport;
use crate::node::NodeState;
use crate::router::BroadcastReport;

// ---------------------------------------------------------------------------
// NodeCommand
// ---------------------------------------------------------------------------

/// Commands accepted by the node event loop.
///
/// Long-running commands (connect, broadcast, file send) run on worker
/// tasks so the loop keeps draining network events meanwhile.
pub enum NodeCommand {
    /// Dial `address:port` and run the handshake.
    ConnectTo {
        /// Host name or IP address.
        address: String,
        /// Peer listening port.
        port: u16,
        /// Name to register the peer under instead of the one it sends.
        name: Option<String>,
        /// Registered peer id, or the connect/handshake error.
        reply: oneshot::Sender<Result<PeerId>>,
    },

    /// Send a chat line to every connected peer.
    SendBroadcast {
        /// Message body.
        text: String,
        /// Username the message is meant for, if private.
        recipient: Option<String>,
        /// Per-peer outcome.
        reply: oneshot::Sender<BroadcastReport>,
    },

    /// Stream a file to one peer.
    SendFile {
        /// Receiving peer.
        peer: PeerId,
        /// Local file to send.
        path: PathBuf,
        /// Transfer summary, or why it stopped.
        reply: oneshot::Sender<Result<FileSendReport>>,
    },

    /// List live sessions.
    ListPeers {
        /// Reply channel for the peer list.
        reply: oneshot::Sender<Vec<PeerInfo>>,
    },

    /// Query the current node status.
    GetStatus {
        /// Reply channel for the status snapshot.
        reply: oneshot::Sender<NodeStatus>,
    },

    /// Initiate graceful shutdown.
    ///
    /// No reply channel; await the `JoinHandle` returned by
    /// [`Node::start`](crate::node::Node::start) to confirm completion.
    Shutdown,
}

// Manual Debug because oneshot::Sender does not implement Debug.
impl std::fmt::Debug for NodeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectTo { address, port, name, .. } => f
                .debug_struct("ConnectTo")
                .field("address", address)
                .field("port", port)
                .field("name", name)
                .finish_non_exhaustive(),
            Self::SendBroadcast { text, recipient, .. } => f
                .debug_struct("SendBroadcast")
                .field("len", &text.len())
                .field("recipient", recipient)
                .finish_non_exhaustive(),
            Self::SendFile { peer, path, .. } => f
                .debug_struct("SendFile")
                .field("peer", peer)
                .field("path", path)
                .finish_non_exhaustive(),
            Self::ListPeers { .. } => f.write_str("ListPeers"),
            Self::GetStatus { .. } => f.write_str("GetStatus"),
            Self::Shutdown => f.write_str("Shutdown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Replies
// ---------------------------------------------------------------------------

/// One live session as seen by [`NodeCommand::ListPeers`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    /// Registered peer id.
    pub peer: PeerId,
    /// Current session identifier.
    pub session_id: SessionId,
    /// Fingerprint of the peer's public key.
    pub fingerprint: String,
    /// `true` if the peer dialed us.
    pub inbound: bool,
    /// When the session was registered.
    pub connected_at: DateTime<Utc>,
}

/// Snapshot of the node's current state.
#[derive(Clone, Debug)]
pub struct NodeStatus {
    /// Current state machine state.
    pub state: NodeState,
    /// Local username.
    pub username: String,
    /// Fingerprint of the local public key.
    pub fingerprint: String,
    /// Address the peer listener is bound to.
    pub listen_addr: SocketAddr,
    /// Number of live sessions.
    pub peers: usize,
    /// When the event loop started.
    pub started_at: DateTime<Utc>,
}
