//! Per-session receive loop.
//!
//! Reads one frame at a time, decrypts it with the session key, and
//! forwards the envelope to the node as a [`NetworkEvent`]. Any read
//! or decryption failure ends the loop: the session is removed from
//! the registry (if it is still the current one for that peer) and a
//! single [`NetworkEvent::SessionClosed`] is emitted. Other sessions
//! are never affected.

use std::sync::Arc;

use peerchat_protocol::framing::read_frame;
use peerchat_protocol::sealed::open_envelope;
use peerchat_types::PeerChatError;

use crate::events::{EventSender, NetworkEvent};
use crate::registry::SessionRegistry;
use crate::session::{BoxedReader, Session};

/// Drives `session` until the connection fails or the task is aborted.
pub async fn run_receive_loop(
    session: Arc<Session>,
    mut reader: BoxedReader,
    registry: Arc<SessionRegistry>,
    events: EventSender,
    max_frame_len: usize,
) {
    let peer = session.peer().clone();
    let session_id = session.id();
    tracing::debug!(%peer, session = %session_id, "receive loop started");

    let reason = loop {
        let frame = match read_frame(&mut reader, max_frame_len).await {
            Ok(frame) => frame,
            Err(e) => break e,
        };

        let envelope = match open_envelope(session.key(), &frame) {
            Ok(envelope) => envelope,
            Err(e) => break e,
        };

        tracing::debug!(%peer, kind = envelope.kind(), bytes = frame.len(), "envelope received");
        let event = NetworkEvent::EnvelopeReceived {
            peer: peer.clone(),
            session_id,
            envelope,
            sealed: frame,
        };
        if events.send(event).is_err() {
            // Node event loop is gone; nothing left to deliver to.
            break PeerChatError::TransportError {
                reason: "node stopped".into(),
            };
        }
    };

    match &reason {
        PeerChatError::TransportError { .. } => {
            tracing::info!(%peer, session = %session_id, %reason, "session ended")
        }
        _ => tracing::warn!(%peer, session = %session_id, %reason, "session terminated"),
    }

    close_session(&session, &registry, &events, reason.to_string());
}

/// Removes `session` if it is still current and reports it closed.
///
/// Returns `true` if this call removed it. Safe to call from several
/// places for the same session; only the first emits an event.
pub fn close_session(
    session: &Arc<Session>,
    registry: &SessionRegistry,
    events: &EventSender,
    reason: String,
) -> bool {
    let removed = registry.remove_if_current(session.peer(), session.id());
    session.close();
    if removed {
        let _ = events.send(NetworkEvent::SessionClosed {
            peer: session.peer().clone(),
            session_id: session.id(),
            reason,
        });
    }
    removed
}
