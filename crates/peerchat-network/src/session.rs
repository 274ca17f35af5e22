//! One established, encrypted peer connection.
//!
//! A [`Session`] owns the write half of the connection and the session
//! key. The read half belongs to the session's receive loop task, whose
//! abort handle the session keeps so it can be stopped on replacement
//! or shutdown.
//!
//! Writes go through an async mutex: one frame is always written in
//! full before the next one starts, so the receiver can decrypt every
//! frame on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use peerchat_crypto::ecdh::SessionKey;
use peerchat_protocol::envelope::Envelope;
use peerchat_protocol::framing::write_frame;
use peerchat_protocol::sealed::seal_envelope;
use peerchat_types::{PeerChatError, PeerId, Result, SessionId};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::task::AbortHandle;

/// Type-erased read half of a connection.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Type-erased write half of a connection.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A live session with one peer.
pub struct Session {
    peer: PeerId,
    id: SessionId,
    key: SessionKey,
    fingerprint: String,
    inbound: bool,
    created_at: DateTime<Utc>,
    writer: tokio::sync::Mutex<BoxedWriter>,
    receive_task: Mutex<Option<AbortHandle>>,
    closed: AtomicBool,
}

impl Session {
    /// Wraps the write half of an authenticated connection.
    pub fn new(
        peer: PeerId,
        id: SessionId,
        key: SessionKey,
        fingerprint: String,
        inbound: bool,
        writer: BoxedWriter,
    ) -> Self {
        Self {
            peer,
            id,
            key,
            fingerprint,
            inbound,
            created_at: Utc::now(),
            writer: tokio::sync::Mutex::new(writer),
            receive_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Peer this session belongs to.
    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// Process-unique session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Symmetric key shared with the peer.
    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    /// Fingerprint of the peer's public key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// `true` if the peer dialed us.
    pub fn is_inbound(&self) -> bool {
        self.inbound
    }

    /// When the handshake completed.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// `true` once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Writes one already-sealed frame.
    ///
    /// # Errors
    ///
    /// [`PeerChatError::TransportError`] if the session is closed or the
    /// write fails.
    pub async fn send_sealed(&self, sealed: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(PeerChatError::TransportError {
                reason: format!("session {} with {} is closed", self.id, self.peer),
            });
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, sealed).await
    }

    /// Seals `envelope` with the session key and writes it.
    ///
    /// Returns the sealed bytes so the caller can record them.
    pub async fn send_envelope(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        let sealed = seal_envelope(&self.key, envelope)?;
        self.send_sealed(&sealed).await?;
        tracing::debug!(peer = %self.peer, kind = envelope.kind(), "envelope sent");
        Ok(sealed)
    }

    /// Records the receive loop so [`close`](Self::close) can stop it.
    ///
    /// If the session was already closed the task is aborted at once.
    pub fn attach_receive_task(&self, handle: AbortHandle) {
        if let Ok(mut slot) = self.receive_task.lock() {
            if self.is_closed() {
                handle.abort();
            } else {
                *slot = Some(handle);
            }
        }
    }

    /// Marks the session closed and stops its receive loop.
    ///
    /// Idempotent. Dropping the read half together with the last
    /// reference to the write half releases the connection.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Ok(mut slot) = self.receive_task.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
        tracing::debug!(peer = %self.peer, session = %self.id, "session closed");
    }

    /// Flushes and shuts down the write half. Used on orderly shutdown.
    pub async fn shutdown_writer(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.peer)
            .field("id", &self.id)
            .field("inbound", &self.inbound)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
