//! LAN peer discovery over UDP broadcast.
//!
//! - **Broadcaster**: sends an [`Announcement`] with the local username
//!   and TCP port to the broadcast address every interval.
//! - **Listener**: receives announcements, ignores its own and any
//!   malformed datagram, and reports each other username once.
//!
//! Discovery only reports; connecting to a discovered peer is left to
//! the front-end.

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use peerchat_protocol::discovery::{Announcement, MAX_ANNOUNCEMENT_LEN};
use peerchat_types::{PeerChatError, Result};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::events::{EventSender, NetworkEvent};

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// A newly discovered node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Announced username.
    pub username: String,
    /// Source address of the datagram.
    pub address: IpAddr,
    /// Advertised TCP port.
    pub port: u16,
}

/// Dedupe state of one listener.
///
/// Usernames are remembered for the lifetime of the tracker, so a
/// node that restarts on a new port is not reported again.
pub struct DiscoveryTracker {
    local_username: String,
    seen: HashSet<String>,
}

impl DiscoveryTracker {
    /// Creates a tracker that ignores `local_username`.
    pub fn new(local_username: impl Into<String>) -> Self {
        Self {
            local_username: local_username.into(),
            seen: HashSet::new(),
        }
    }

    /// Returns the peer if this is the first announcement from it.
    pub fn observe(&mut self, announcement: Announcement, source: IpAddr) -> Option<DiscoveredPeer> {
        if announcement.username == self.local_username {
            return None;
        }
        if !self.seen.insert(announcement.username.clone()) {
            return None;
        }
        Some(DiscoveredPeer {
            username: announcement.username,
            address: source,
            port: announcement.p2p_port,
        })
    }

    /// Parses a raw datagram and feeds it to [`observe`](Self::observe).
    pub fn observe_datagram(&mut self, datagram: &[u8], source: IpAddr) -> Option<DiscoveredPeer> {
        match Announcement::from_json(datagram) {
            Ok(ann) => self.observe(ann, source),
            Err(e) => {
                tracing::debug!(%source, %e, "ignoring malformed discovery datagram");
                None
            }
        }
    }

    /// Number of distinct peers reported.
    pub fn seen_count(&self) -> usize {
        self.seen.len()
    }
}

// ---------------------------------------------------------------------------
// Sockets
// ---------------------------------------------------------------------------

/// Binds the listener socket.
pub async fn bind_listener(addr: SocketAddr) -> Result<UdpSocket> {
    UdpSocket::bind(addr)
        .await
        .map_err(|e| PeerChatError::TransportError {
            reason: format!("cannot bind discovery listener on {addr}: {e}"),
        })
}

/// Binds an ephemeral socket allowed to send broadcasts.
pub async fn bind_broadcaster() -> Result<UdpSocket> {
    let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0)))
        .await
        .map_err(|e| PeerChatError::TransportError {
            reason: format!("cannot bind discovery broadcaster: {e}"),
        })?;
    socket
        .set_broadcast(true)
        .map_err(|e| PeerChatError::TransportError {
            reason: format!("cannot enable broadcast: {e}"),
        })?;
    Ok(socket)
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Announces `announcement` to `target` every `interval` until shutdown.
///
/// The first announcement goes out immediately. Send failures are
/// logged and retried on the next tick.
pub async fn run_broadcaster(
    socket: UdpSocket,
    target: SocketAddr,
    announcement: Announcement,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let payload = match announcement.to_json() {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(%e, "cannot encode discovery announcement");
            return;
        }
    };

    tracing::info!(%target, every = ?interval, user = %announcement.username, "discovery broadcaster started");
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(&payload, target).await {
                    tracing::warn!(%target, %e, "discovery announcement failed");
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("discovery broadcaster stopped");
}

/// Receives announcements until shutdown, emitting
/// [`NetworkEvent::PeerDiscovered`] for each new username.
pub async fn run_listener(
    socket: UdpSocket,
    mut tracker: DiscoveryTracker,
    events: EventSender,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut buf = vec![0u8; MAX_ANNOUNCEMENT_LEN];
    loop {
        tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok((n, source)) => {
                    if let Some(peer) = tracker.observe_datagram(&buf[..n], source.ip()) {
                        tracing::info!(user = %peer.username, addr = %peer.address, port = peer.port, "peer discovered");
                        let event = NetworkEvent::PeerDiscovered {
                            username: peer.username,
                            address: peer.address,
                            port: peer.port,
                        };
                        if events.send(event).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => tracing::warn!(%e, "discovery receive failed"),
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    tracing::debug!("discovery listener stopped");
}
