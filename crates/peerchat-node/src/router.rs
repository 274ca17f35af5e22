//! Outbound message routing.
//!
//! [`Router::send_broadcast`] fans one chat line out to every live
//! session. Each peer is handled in its own future: the limiter is
//! consulted, the envelope is sealed with that peer's key and written
//! under a timeout, and the sealed bytes are appended to that peer's
//! history. A peer that fails or stalls is dropped from the registry
//! and reported as failed; the others are unaffected.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use peerchat_network::session::Session;
use peerchat_network::transport::PeerTransport;
use peerchat_protocol::envelope::Envelope;
use peerchat_storage::history::HistoryLog;
use peerchat_types::{PeerChatError, PeerId, Result};

use crate::rate_limiter::RateLimiter;

// ---------------------------------------------------------------------------
// BroadcastReport
// ---------------------------------------------------------------------------

/// Per-call outcome of a broadcast.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Peers the envelope was written to.
    pub delivered: Vec<PeerId>,
    /// Peers skipped because they were sent to within the window.
    pub rate_limited: Vec<PeerId>,
    /// Peers whose write failed, with the reason.
    pub failed: Vec<(PeerId, String)>,
}

impl BroadcastReport {
    /// Number of peers attempted.
    pub fn total(&self) -> usize {
        self.delivered.len() + self.rate_limited.len() + self.failed.len()
    }
}

enum PeerOutcome {
    Delivered(PeerId),
    RateLimited(PeerId),
    Failed(PeerId, String),
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Sends envelopes to live sessions.
pub struct Router {
    transport: Arc<PeerTransport>,
    history: Arc<HistoryLog>,
    limiter: RateLimiter,
    send_timeout: Duration,
}

impl Router {
    /// Creates a router over `transport`'s session registry.
    pub fn new(
        transport: Arc<PeerTransport>,
        history: Arc<HistoryLog>,
        rate_limit_window: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            transport,
            history,
            limiter: RateLimiter::new(rate_limit_window),
            send_timeout,
        }
    }

    /// Underlying transport.
    pub fn transport(&self) -> &Arc<PeerTransport> {
        &self.transport
    }

    /// Outbound limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Sends `text` to every live session, optionally restricted to
    /// `recipient`.
    ///
    /// The restriction travels inside the envelope; every peer still
    /// receives it and decides whether to display it.
    pub async fn send_broadcast(&self, text: &str, recipient: Option<String>) -> BroadcastReport {
        let sessions = self.transport.registry().snapshot();
        let envelope = Envelope::message(
            self.transport.config().username.clone(),
            text,
            recipient.filter(|r| !r.trim().is_empty()),
        );

        let outcomes = join_all(
            sessions
                .iter()
                .map(|session| self.deliver_one(session, &envelope)),
        )
        .await;

        let mut report = BroadcastReport::default();
        for outcome in outcomes {
            match outcome {
                PeerOutcome::Delivered(peer) => report.delivered.push(peer),
                PeerOutcome::RateLimited(peer) => report.rate_limited.push(peer),
                PeerOutcome::Failed(peer, reason) => report.failed.push((peer, reason)),
            }
        }

        tracing::info!(
            delivered = report.delivered.len(),
            rate_limited = report.rate_limited.len(),
            failed = report.failed.len(),
            "broadcast sent"
        );
        report
    }

    async fn deliver_one(&self, session: &Arc<Session>, envelope: &Envelope) -> PeerOutcome {
        let peer = session.peer().clone();

        if let Err(e) = self.limiter.check(&peer) {
            tracing::debug!(%peer, %e, "send skipped");
            return PeerOutcome::RateLimited(peer);
        }

        match self.send_to(session, envelope).await {
            Ok(sealed) => {
                if let Err(e) = self.history.append(&peer, &sealed) {
                    tracing::warn!(%peer, %e, "history append failed");
                }
                PeerOutcome::Delivered(peer)
            }
            Err(e) => PeerOutcome::Failed(peer, e.to_string()),
        }
    }

    /// Seals and writes `envelope` on `session` within the send timeout.
    ///
    /// On failure or timeout the session is torn down. Returns the
    /// sealed bytes that were written.
    pub async fn send_to(&self, session: &Arc<Session>, envelope: &Envelope) -> Result<Vec<u8>> {
        let result = match tokio::time::timeout(self.send_timeout, session.send_envelope(envelope)).await {
            Ok(res) => res,
            Err(_) => Err(PeerChatError::TransportError {
                reason: format!("write stalled for {:?}", self.send_timeout),
            }),
        };

        if let Err(e) = &result {
            tracing::warn!(peer = %session.peer(), session = %session.id(), %e, "send failed");
            self.transport.drop_session(session, &e.to_string());
        }
        result
    }

    /// Looks up the live session for `peer`.
    pub fn session_for(&self, peer: &PeerId) -> Result<Arc<Session>> {
        self.transport
            .registry()
            .get(peer)
            .ok_or_else(|| PeerChatError::UnknownPeer { peer: peer.clone() })
    }
}
