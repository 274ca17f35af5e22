//! Inbound event processing.
//!
//! Translates [`NetworkEvent`]s into front-end [`NodeEvent`]s. For
//! every decrypted envelope the node:
//!
//! 1. Appends the sealed frame to the sender's history log.
//! 2. Drops it from display if it is addressed to someone else.
//! 3. Surfaces chat lines, appends file chunks, and verifies files
//!    when their end marker arrives.
//!
//! Storage failures are logged and skipped; they never end a session.

use peerchat_network::events::NetworkEvent;
use peerchat_protocol::envelope::Envelope;
use peerchat_storage::history::HistoryLog;
use peerchat_storage::received::{ExpectedFile, ReceivedFiles};
use peerchat_types::{NodeEvent, PeerId};
use tokio::sync::mpsc;

use crate::rate_limiter::RateLimiter;

/// Borrowed state the handler needs.
pub struct Inbound<'a> {
    /// Local username, used for recipient filtering.
    pub local_username: &'a str,
    /// Per-peer history log.
    pub history: &'a HistoryLog,
    /// Received-file sink.
    pub received: &'a ReceivedFiles,
    /// Outbound limiter; a departed peer's window is dropped.
    pub limiter: &'a RateLimiter,
    /// Front-end event channel.
    pub event_tx: &'a mpsc::Sender<NodeEvent>,
}

// ---------------------------------------------------------------------------
// Network events
// ---------------------------------------------------------------------------

/// Handles one network event.
pub async fn handle_network_event(event: NetworkEvent, ctx: &Inbound<'_>) {
    let node_event = match event {
        NetworkEvent::SessionEstablished {
            peer,
            fingerprint,
            inbound,
            ..
        } => Some(NodeEvent::PeerJoined {
            peer,
            fingerprint,
            inbound,
        }),

        NetworkEvent::FingerprintSeen { peer, fingerprint } => {
            Some(NodeEvent::FingerprintSeen { peer, fingerprint })
        }

        NetworkEvent::EnvelopeReceived {
            peer,
            envelope,
            sealed,
            ..
        } => {
            if let Err(e) = ctx.history.append(&peer, &sealed) {
                tracing::warn!(%peer, %e, "history append failed");
            }
            process_envelope(&peer, envelope, ctx.local_username, ctx.received)
        }

        NetworkEvent::SessionClosed {
            peer,
            session_id,
            reason,
        } => {
            ctx.limiter.forget(&peer);
            let abandoned = ctx.received.abandon_peer(&peer);
            if abandoned > 0 {
                tracing::warn!(%peer, abandoned, "incomplete file transfers abandoned");
            }
            tracing::info!(%peer, session = %session_id, %reason, "peer left");
            Some(NodeEvent::PeerLeft { peer })
        }

        NetworkEvent::PeerDiscovered {
            username,
            address,
            port,
        } => Some(NodeEvent::PeerDiscovered {
            username,
            address,
            port,
        }),
    };

    if let Some(ev) = node_event {
        if ctx.event_tx.send(ev).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Applies one decrypted envelope from `peer`.
///
/// Returns the event to surface, if any. History is not touched here.
pub fn process_envelope(
    peer: &PeerId,
    envelope: Envelope,
    local_username: &str,
    received: &ReceivedFiles,
) -> Option<NodeEvent> {
    if !envelope.is_addressed_to(local_username) {
        tracing::debug!(%peer, recipient = ?envelope.recipient(), "envelope for another user");
        return None;
    }

    match envelope {
        Envelope::Message {
            sender,
            text,
            private,
            ts,
        } => Some(NodeEvent::MessageReceived {
            peer: peer.clone(),
            sender,
            text,
            private: private.is_some(),
            timestamp: ts,
        }),

        Envelope::FileChunk { name, chunk } => {
            if let Err(e) = received.append_chunk(peer, &name, &chunk) {
                tracing::warn!(%peer, file = %name, %e, "file chunk dropped");
            }
            None
        }

        Envelope::FileEnd {
            name,
            chunks,
            size,
            sha256,
        } => {
            let expected = ExpectedFile {
                chunks,
                size,
                sha256,
            };
            match received.finish(peer, &name, &expected) {
                Ok(file) => {
                    tracing::info!(
                        %peer,
                        file = %file.name,
                        size = file.size,
                        verified = file.verified,
                        "file received"
                    );
                    Some(NodeEvent::FileReceived {
                        peer: peer.clone(),
                        name: file.name,
                        path: file.path,
                        size: file.size,
                        verified: file.verified,
                    })
                }
                Err(e) => {
                    tracing::warn!(%peer, file = %name, %e, "cannot finish file");
                    None
                }
            }
        }
    }
}
