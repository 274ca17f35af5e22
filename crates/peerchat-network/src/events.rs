//! Events emitted by the network layer.
//!
//! [`NetworkEvent`] is what the node event loop consumes from the
//! transport, the receive loops, and the discovery listener.

use std::net::IpAddr;

use peerchat_protocol::envelope::Envelope;
use peerchat_types::{PeerId, SessionId};
use tokio::sync::mpsc;

/// Sending half used by every network task.
pub type EventSender = mpsc::UnboundedSender<NetworkEvent>;

/// Receiving half owned by the node event loop.
pub type EventReceiver = mpsc::UnboundedReceiver<NetworkEvent>;

/// Events emitted by the network layer.
#[derive(Clone, Debug)]
pub enum NetworkEvent {
    /// A handshake finished and the session was registered.
    SessionEstablished {
        /// Registered peer id.
        peer: PeerId,
        /// Identifier of the new session.
        session_id: SessionId,
        /// Fingerprint of the peer's public key.
        fingerprint: String,
        /// `true` if the remote side dialed us.
        inbound: bool,
    },

    /// A public key fingerprint was presented for the first time.
    FingerprintSeen {
        /// Peer presenting the key.
        peer: PeerId,
        /// Hex SHA-256 of the key bytes.
        fingerprint: String,
    },

    /// A frame was decrypted into an envelope.
    EnvelopeReceived {
        /// Session owner.
        peer: PeerId,
        /// Session the envelope arrived on.
        session_id: SessionId,
        /// Decrypted envelope.
        envelope: Envelope,
        /// The sealed frame payload as received.
        sealed: Vec<u8>,
    },

    /// A session ended and was removed from the registry.
    ///
    /// Emitted at most once per session.
    SessionClosed {
        /// Former session owner.
        peer: PeerId,
        /// Identifier of the ended session.
        session_id: SessionId,
        /// Why it ended.
        reason: String,
    },

    /// A new node was heard on the discovery channel.
    PeerDiscovered {
        /// Announced username.
        username: String,
        /// Datagram source address.
        address: IpAddr,
        /// Advertised TCP port.
        port: u16,
    },
}

/// Creates the network event channel.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
