//! Key-exchange handshake run once on every new connection.
//!
//! ```text
//! Connecting ──hello/reply──▶ KeysExchanged ──register──▶ SessionEstablished
//!      │                           │
//!      └──── malformed / closed / timeout ────▶ Failed
//! ```
//!
//! - Responder (inbound): read exactly one [`Hello`], answer with one
//!   [`HelloReply`], derive the session key.
//! - Initiator (outbound): send one [`Hello`], read exactly one
//!   [`HelloReply`], derive the session key.
//!
//! Both messages travel in frames capped at
//! [`MAX_HANDSHAKE_FRAME_LEN`]. Any failure leaves the handshake in
//! `Failed` and is reported as [`PeerChatError::HandshakeError`]; the
//! caller then drops the connection without registering anything.

use std::fmt;
use std::time::Duration;

use peerchat_crypto::ecdh::SessionKey;
use peerchat_crypto::hash;
use peerchat_crypto::identity::Identity;
use peerchat_protocol::framing::{read_frame, write_frame, MAX_HANDSHAKE_FRAME_LEN};
use peerchat_protocol::handshake::{Hello, HelloReply};
use peerchat_types::{PeerChatError, Result};
use tokio::io::{AsyncRead, AsyncWrite};

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Progress of one handshake.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HandshakeState {
    /// Connection open, nothing exchanged yet.
    Connecting,
    /// Both public keys known and the session key derived.
    KeysExchanged,
    /// Session registered; terminal.
    SessionEstablished,
    /// Handshake aborted; terminal.
    Failed,
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::KeysExchanged => write!(f, "keys_exchanged"),
            Self::SessionEstablished => write!(f, "session_established"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Which side of the connection we are.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    /// We dialed the peer and speak first.
    Initiator,
    /// The peer dialed us.
    Responder,
}

/// What a successful exchange yields.
pub struct HandshakeOutcome {
    /// Username announced by the remote side, if it sent one.
    pub remote_username: Option<String>,
    /// Remote public key exactly as received.
    pub remote_pubkey: String,
    /// Fingerprint of `remote_pubkey`.
    pub fingerprint: String,
    /// Derived session key.
    pub key: SessionKey,
}

/// One handshake in progress.
pub struct Handshake<'a> {
    identity: &'a Identity,
    username: &'a str,
    role: Role,
    state: HandshakeState,
}

impl<'a> Handshake<'a> {
    /// Starts a handshake in `Connecting`.
    pub fn new(identity: &'a Identity, username: &'a str, role: Role) -> Self {
        Self {
            identity,
            username,
            role,
            state: HandshakeState::Connecting,
        }
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Runs the exchange on `io`, bounded by `timeout`.
    ///
    /// On success the state is `KeysExchanged`; call
    /// [`mark_established`](Self::mark_established) once the session is
    /// registered.
    pub async fn run<S>(&mut self, io: &mut S, timeout: Duration) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if self.state != HandshakeState::Connecting {
            return Err(PeerChatError::HandshakeError {
                reason: format!("handshake already {}", self.state),
            });
        }

        let result = match tokio::time::timeout(timeout, self.exchange(io)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => Err(as_handshake_error(e)),
            Err(_) => Err(PeerChatError::HandshakeError {
                reason: format!("timed out after {timeout:?}"),
            }),
        };

        match &result {
            Ok(_) => self.state = HandshakeState::KeysExchanged,
            Err(e) => {
                tracing::debug!(role = ?self.role, %e, "handshake failed");
                self.state = HandshakeState::Failed;
            }
        }
        result
    }

    /// Moves `KeysExchanged → SessionEstablished`.
    pub fn mark_established(&mut self) -> Result<()> {
        if self.state != HandshakeState::KeysExchanged {
            return Err(PeerChatError::HandshakeError {
                reason: format!("cannot establish a session from state {}", self.state),
            });
        }
        self.state = HandshakeState::SessionEstablished;
        Ok(())
    }

    async fn exchange<S>(&self, io: &mut S) -> Result<HandshakeOutcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self.role {
            Role::Responder => {
                let hello = Hello::from_json(&read_frame(io, MAX_HANDSHAKE_FRAME_LEN).await?)?;
                let key = self.identity.session_key_with(hello.pubkey.as_bytes())?;

                let reply = HelloReply {
                    pubkey: self.identity.public_key_pem().to_string(),
                    username: Some(self.username.to_string()),
                };
                write_frame(io, &reply.to_json()?).await?;

                Ok(HandshakeOutcome {
                    fingerprint: hash::fingerprint(hello.pubkey.as_bytes()),
                    remote_username: Some(hello.username),
                    remote_pubkey: hello.pubkey,
                    key,
                })
            }
            Role::Initiator => {
                let hello = Hello {
                    username: self.username.to_string(),
                    pubkey: self.identity.public_key_pem().to_string(),
                };
                write_frame(io, &hello.to_json()?).await?;

                let reply = HelloReply::from_json(&read_frame(io, MAX_HANDSHAKE_FRAME_LEN).await?)?;
                let key = self.identity.session_key_with(reply.pubkey.as_bytes())?;

                Ok(HandshakeOutcome {
                    fingerprint: hash::fingerprint(reply.pubkey.as_bytes()),
                    remote_username: reply.username,
                    remote_pubkey: reply.pubkey,
                    key,
                })
            }
        }
    }
}

fn as_handshake_error(e: PeerChatError) -> PeerChatError {
    match e {
        PeerChatError::HandshakeError { .. } => e,
        other => PeerChatError::HandshakeError {
            reason: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn both_roles_derive_the_same_key() -> Result<()> {
        let alice = Identity::generate()?;
        let bob = Identity::generate()?;
        let (mut a_io, mut b_io) = tokio::io::duplex(64 * 1024);

        let mut init = Handshake::new(&alice, "alice", Role::Initiator);
        let mut resp = Handshake::new(&bob, "bob", Role::Responder);
        let (a, b) = tokio::join!(
            init.run(&mut a_io, Duration::from_secs(5)),
            resp.run(&mut b_io, Duration::from_secs(5)),
        );
        let (a, b) = (a?, b?);

        assert_eq!(a.key, b.key);
        assert_eq!(a.remote_username.as_deref(), Some("bob"));
        assert_eq!(b.remote_username.as_deref(), Some("alice"));
        assert_eq!(a.fingerprint, bob.fingerprint());
        assert_eq!(b.fingerprint, alice.fingerprint());
        assert_eq!(init.state(), HandshakeState::KeysExchanged);
        init.mark_established()?;
        assert_eq!(init.state(), HandshakeState::SessionEstablished);
        Ok(())
    }

    #[tokio::test]
    async fn garbage_hello_fails() -> Result<()> {
        let bob = Identity::generate()?;
        let (mut a_io, mut b_io) = tokio::io::duplex(1024);
        write_frame(&mut a_io, b"not json").await?;

        let mut resp = Handshake::new(&bob, "bob", Role::Responder);
        let res = resp.run(&mut b_io, Duration::from_secs(5)).await;
        assert!(matches!(res, Err(PeerChatError::HandshakeError { .. })));
        assert_eq!(resp.state(), HandshakeState::Failed);
        assert!(resp.mark_established().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn closed_connection_fails() -> Result<()> {
        let bob = Identity::generate()?;
        let (mut a_io, mut b_io) = tokio::io::duplex(1024);
        let _ = a_io.shutdown().await;
        drop(a_io);

        let mut resp = Handshake::new(&bob, "bob", Role::Responder);
        assert!(resp.run(&mut b_io, Duration::from_secs(5)).await.is_err());
        assert_eq!(resp.state(), HandshakeState::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn silent_peer_times_out() -> Result<()> {
        let alice = Identity::generate()?;
        let (mut a_io, _b_io) = tokio::io::duplex(64 * 1024);

        let mut init = Handshake::new(&alice, "alice", Role::Initiator);
        let res = init.run(&mut a_io, Duration::from_millis(100)).await;
        assert!(matches!(res, Err(PeerChatError::HandshakeError { .. })));
        assert_eq!(init.state(), HandshakeState::Failed);
        Ok(())
    }

    #[tokio::test]
    async fn invalid_public_key_fails() -> Result<()> {
        let bob = Identity::generate()?;
        let (mut a_io, mut b_io) = tokio::io::duplex(1024);
        let hello = Hello {
            username: "mallory".into(),
            pubkey: "-----BEGIN PUBLIC KEY-----\nAAAA\n-----END PUBLIC KEY-----\n".into(),
        };
        write_frame(&mut a_io, &hello.to_json()?).await?;

        let mut resp = Handshake::new(&bob, "bob", Role::Responder);
        assert!(resp.run(&mut b_io, Duration::from_secs(5)).await.is_err());
        Ok(())
    }
}
