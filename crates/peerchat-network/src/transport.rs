//! TCP transport: accept loop, outbound connect, and session set-up.
//!
//! [`PeerTransport`] owns everything a connection needs once it is
//! authenticated: the local identity, the session registry, the
//! fingerprint book, and the sending half of the network event
//! channel. Inbound and outbound connections go through the same
//! path: handshake, then session registration and the receive loop.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use peerchat_crypto::identity::Identity;
use peerchat_types::{PeerChatError, PeerId, Result, SessionId};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::config::NetworkConfig;
use crate::events::{EventSender, NetworkEvent};
use crate::fingerprints::FingerprintBook;
use crate::handshake::{Handshake, HandshakeOutcome, Role};
use crate::receiver::{close_session, run_receive_loop};
use crate::registry::SessionRegistry;
use crate::session::Session;

/// Shared transport state. Cheap to clone behind an `Arc`.
pub struct PeerTransport {
    config: NetworkConfig,
    identity: Arc<Identity>,
    registry: Arc<SessionRegistry>,
    fingerprints: FingerprintBook,
    events: EventSender,
    next_session_id: AtomicU64,
    closing: AtomicBool,
}

impl PeerTransport {
    /// Creates the transport. Nothing is bound until [`bind`](Self::bind).
    pub fn new(config: NetworkConfig, identity: Arc<Identity>, events: EventSender) -> Self {
        Self {
            config,
            identity,
            registry: Arc::new(SessionRegistry::new()),
            fingerprints: FingerprintBook::new(),
            events,
            next_session_id: AtomicU64::new(1),
            closing: AtomicBool::new(false),
        }
    }

    /// Network configuration in use.
    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Local identity.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Live sessions.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Fingerprints shown so far.
    pub fn fingerprints(&self) -> &FingerprintBook {
        &self.fingerprints
    }

    /// `true` once [`close_all`](Self::close_all) has started.
    ///
    /// No new session is registered after that point.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Binds the peer listener on the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        TcpListener::bind(self.config.listen_addr)
            .await
            .map_err(|e| PeerChatError::TransportError {
                reason: format!("cannot listen on {}: {e}", self.config.listen_addr),
            })
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Accepts connections until `shutdown` flips to `true`.
    ///
    /// Each connection's handshake runs in its own task so a slow peer
    /// cannot hold up the listener. Pending handshakes are aborted on
    /// shutdown.
    pub async fn run_accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".into());
        tracing::info!(addr = %local, "accepting peer connections");

        let mut handshakes = JoinSet::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, remote)) => {
                        let this = Arc::clone(&self);
                        handshakes.spawn(async move {
                            if let Err(e) = this.accept_stream(stream, remote.to_string()).await {
                                tracing::warn!(%remote, %e, "inbound handshake failed");
                            }
                        });
                    }
                    Err(e) => tracing::warn!(%e, "accept failed"),
                },
                Some(_) = handshakes.join_next(), if !handshakes.is_empty() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        handshakes.abort_all();
        tracing::info!("accept loop stopped");
    }

    /// Runs the responder handshake on `stream` and registers the session.
    pub async fn accept_stream<S>(&self, mut stream: S, remote: String) -> Result<PeerId>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let mut handshake = Handshake::new(&self.identity, &self.config.username, Role::Responder);
        let outcome = handshake.run(&mut stream, self.config.handshake_timeout).await?;

        let peer = match &outcome.remote_username {
            Some(name) => PeerId::new(name.clone()),
            None => PeerId::new(remote),
        };
        self.establish(stream, peer.clone(), outcome, true)?;
        handshake.mark_established()?;
        Ok(peer)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Dials `addr`, runs the initiator handshake, and registers the session.
    ///
    /// The connect step is retried `connect_retries` times with linear
    /// backoff. The peer is registered under `name` if given, else the
    /// username from the reply, else `addr`.
    pub async fn connect(&self, addr: SocketAddr, name: Option<String>) -> Result<PeerId> {
        let stream = self.dial(addr).await?;
        self.connect_stream(stream, addr.to_string(), name).await
    }

    /// Runs the initiator handshake over an already-open stream.
    pub async fn connect_stream<S>(
        &self,
        mut stream: S,
        remote: String,
        name: Option<String>,
    ) -> Result<PeerId>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let name = name.filter(|n| !n.trim().is_empty());
        if let Some(n) = &name {
            PeerId::check_name(n).map_err(|reason| PeerChatError::ConfigError { reason })?;
        }

        let mut handshake = Handshake::new(&self.identity, &self.config.username, Role::Initiator);
        let outcome = handshake.run(&mut stream, self.config.handshake_timeout).await?;

        let peer = name
            .or_else(|| outcome.remote_username.clone())
            .map(PeerId::new)
            .unwrap_or_else(|| PeerId::new(remote));
        self.establish(stream, peer.clone(), outcome, false)?;
        handshake.mark_established()?;
        Ok(peer)
    }

    async fn dial(&self, addr: SocketAddr) -> Result<TcpStream> {
        let attempts = self.config.connect_retries + 1;
        let mut last_err = String::new();

        for attempt in 1..=attempts {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(stream);
                }
                Err(e) => {
                    tracing::debug!(%addr, attempt, %e, "connect attempt failed");
                    last_err = e.to_string();
                    if attempt < attempts {
                        tokio::time::sleep(self.config.connect_backoff * attempt).await;
                    }
                }
            }
        }

        Err(PeerChatError::TransportError {
            reason: format!("cannot connect to {addr} after {attempts} attempt(s): {last_err}"),
        })
    }

    // -----------------------------------------------------------------------
    // Session set-up / tear-down
    // -----------------------------------------------------------------------

    /// Registers an authenticated connection and starts its receive loop.
    ///
    /// Refused once the transport is closing; the connection is dropped.
    fn establish<S>(
        &self,
        stream: S,
        peer: PeerId,
        outcome: HandshakeOutcome,
        inbound: bool,
    ) -> Result<Arc<Session>>
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        if self.is_closing() {
            return Err(shutting_down(&peer));
        }

        if self.fingerprints.observe(&outcome.fingerprint) {
            tracing::info!(%peer, fingerprint = %outcome.fingerprint, "new peer fingerprint");
            let _ = self.events.send(NetworkEvent::FingerprintSeen {
                peer: peer.clone(),
                fingerprint: outcome.fingerprint.clone(),
            });
        }

        let (reader, writer) = tokio::io::split(stream);
        let session_id = SessionId::new(self.next_session_id.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::new(
            peer.clone(),
            session_id,
            outcome.key,
            outcome.fingerprint.clone(),
            inbound,
            Box::new(writer),
        ));

        self.registry.put(Arc::clone(&session));

        // Announce before the loop can deliver the first envelope.
        tracing::info!(%peer, session = %session_id, inbound, "session established");
        let _ = self.events.send(NetworkEvent::SessionEstablished {
            peer,
            session_id,
            fingerprint: outcome.fingerprint,
            inbound,
        });

        let task = tokio::spawn(run_receive_loop(
            Arc::clone(&session),
            Box::new(reader),
            Arc::clone(&self.registry),
            self.events.clone(),
            self.config.max_frame_len,
        ));
        session.attach_receive_task(task.abort_handle());

        // close_all may have drained the registry between the check above
        // and the put; nothing else will close this session then.
        if self.is_closing() {
            close_session(&session, &self.registry, &self.events, "transport closing".into());
            return Err(shutting_down(session.peer()));
        }
        Ok(session)
    }

    /// Tears down `session` after a failed or stalled write.
    ///
    /// Emits [`NetworkEvent::SessionClosed`] if the session was still
    /// registered.
    pub fn drop_session(&self, session: &Arc<Session>, reason: &str) -> bool {
        close_session(session, &self.registry, &self.events, reason.to_string())
    }

    /// Closes every session and shuts their write halves down.
    ///
    /// Handshakes that finish afterwards are refused.
    pub async fn close_all(&self) {
        self.closing.store(true, Ordering::SeqCst);
        let sessions = self.registry.close_all();
        for session in &sessions {
            session.shutdown_writer().await;
        }
        if !sessions.is_empty() {
            tracing::info!(count = sessions.len(), "all sessions closed");
        }
    }
}

fn shutting_down(peer: &PeerId) -> PeerChatError {
    PeerChatError::TransportError {
        reason: format!("transport is shutting down; session with {peer} refused"),
    }
}
