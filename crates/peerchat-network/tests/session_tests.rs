//! Integration tests: handshake, session registry, receive loops, and
//! discovery, over loopback TCP/UDP and in-memory duplex pipes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use peerchat_crypto::identity::Identity;
use peerchat_network::config::NetworkConfig;
use peerchat_network::discovery::{self, DiscoveryTracker};
use peerchat_network::events::{self, EventReceiver, NetworkEvent};
use peerchat_network::handshake::{Handshake, HandshakeOutcome, Role};
use peerchat_network::transport::PeerTransport;
use peerchat_protocol::discovery::Announcement;
use peerchat_protocol::envelope::Envelope;
use peerchat_protocol::framing::write_frame;
use peerchat_protocol::sealed::seal_envelope;
use peerchat_types::PeerId;
use tokio::io::DuplexStream;
use tokio::net::UdpSocket;
use tokio::sync::watch;

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("peerchat_network=debug")
        .with_test_writer()
        .try_init();
}

fn transport(name: &str) -> Result<(Arc<PeerTransport>, EventReceiver), Box<dyn std::error::Error>> {
    let (tx, rx) = events::channel();
    let identity = Arc::new(Identity::generate()?);
    Ok((Arc::new(PeerTransport::new(NetworkConfig::local(name), identity, tx)), rx))
}

async fn next_event(rx: &mut EventReceiver) -> Result<NetworkEvent, Box<dyn std::error::Error>> {
    match tokio::time::timeout(WAIT, rx.recv()).await {
        Ok(Some(ev)) => Ok(ev),
        Ok(None) => Err("event channel closed".into()),
        Err(_) => Err("timed out waiting for network event".into()),
    }
}

/// Skips events until one matches `pred`.
async fn wait_for<F>(rx: &mut EventReceiver, mut pred: F) -> Result<NetworkEvent, Box<dyn std::error::Error>>
where
    F: FnMut(&NetworkEvent) -> bool,
{
    loop {
        let ev = next_event(rx).await?;
        if pred(&ev) {
            return Ok(ev);
        }
    }
}

/// Plays the dialing side by hand over a duplex pipe.
async fn attach_client(
    server: &PeerTransport,
    name: &str,
) -> Result<(DuplexStream, HandshakeOutcome), Box<dyn std::error::Error>> {
    let identity = Identity::generate()?;
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);

    let mut handshake = Handshake::new(&identity, name, Role::Initiator);
    let (accepted, outcome) = tokio::join!(
        server.accept_stream(server_io, format!("duplex-{name}")),
        handshake.run(&mut client_io, WAIT),
    );
    assert_eq!(accepted?, PeerId::from(name));
    Ok((client_io, outcome?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loopback_connect_registers_both_sides() -> TestResult {
    init_tracing();
    let (alice, mut alice_rx) = transport("alice")?;
    let (bob, mut bob_rx) = transport("bob")?;
    let (_stop_tx, stop_rx) = watch::channel(false);

    let listener = bob.bind().await?;
    let bob_addr: SocketAddr = listener.local_addr()?;
    tokio::spawn(Arc::clone(&bob).run_accept_loop(listener, stop_rx));

    let peer = alice.connect(bob_addr, None).await?;
    assert_eq!(peer, PeerId::from("bob"));

    let ev = wait_for(&mut bob_rx, |e| matches!(e, NetworkEvent::SessionEstablished { .. })).await?;
    match ev {
        NetworkEvent::SessionEstablished { peer, inbound, fingerprint, .. } => {
            assert_eq!(peer, PeerId::from("alice"));
            assert!(inbound);
            assert_eq!(fingerprint, alice.identity().fingerprint());
        }
        other => return Err(format!("unexpected {other:?}").into()),
    }
    let ev = wait_for(&mut alice_rx, |e| matches!(e, NetworkEvent::FingerprintSeen { .. })).await?;
    assert!(matches!(ev, NetworkEvent::FingerprintSeen { ref peer, .. } if peer.as_str() == "bob"));

    // Alice → Bob over the fresh session.
    let session = alice.registry().get(&PeerId::from("bob")).ok_or("no session for bob")?;
    session.send_envelope(&Envelope::message("alice", "hi", None)).await?;

    let ev = wait_for(&mut bob_rx, |e| matches!(e, NetworkEvent::EnvelopeReceived { .. })).await?;
    match ev {
        NetworkEvent::EnvelopeReceived { peer, envelope, .. } => {
            assert_eq!(peer, PeerId::from("alice"));
            assert!(matches!(envelope, Envelope::Message { ref text, .. } if text == "hi"));
        }
        other => return Err(format!("unexpected {other:?}").into()),
    }
    Ok(())
}

#[tokio::test]
async fn connect_to_closed_port_fails_after_retries() -> TestResult {
    let (tx, _rx) = events::channel();
    let config = NetworkConfig {
        connect_retries: 2,
        connect_backoff: Duration::from_millis(10),
        ..NetworkConfig::local("alice")
    };
    let t = PeerTransport::new(config, Arc::new(Identity::generate()?), tx);

    // Bind then drop to get a port nobody listens on.
    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
    let res = t.connect(SocketAddr::from(([127, 0, 0, 1], port)), None).await;
    assert!(res.is_err());
    assert!(t.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn tampered_frame_closes_only_that_session() -> TestResult {
    init_tracing();
    let (bob, mut rx) = transport("bob")?;

    let (mut alice_io, _alice_hs) = attach_client(&bob, "alice").await?;
    let (mut carol_io, carol_hs) = attach_client(&bob, "carol").await?;
    assert_eq!(bob.registry().len(), 2);

    // Alice sends bytes that will not authenticate.
    write_frame(&mut alice_io, &[0x5a; 64]).await?;

    let ev = wait_for(&mut rx, |e| matches!(e, NetworkEvent::SessionClosed { .. })).await?;
    assert!(matches!(ev, NetworkEvent::SessionClosed { ref peer, .. } if peer.as_str() == "alice"));
    assert_eq!(bob.registry().peers(), vec![PeerId::from("carol")]);

    // Carol is unaffected.
    let blob = seal_envelope(&carol_hs.key, &Envelope::message("carol", "still here", None))?;
    write_frame(&mut carol_io, &blob).await?;
    let ev = wait_for(&mut rx, |e| !matches!(e, NetworkEvent::FingerprintSeen { .. })).await?;
    assert!(matches!(ev, NetworkEvent::EnvelopeReceived { ref peer, .. } if peer.as_str() == "carol"));

    // No second close for Alice, even once her pipe is dropped.
    drop(alice_io);
    let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra event: {extra:?}");
    Ok(())
}

#[tokio::test]
async fn reconnect_replaces_without_peer_left() -> TestResult {
    let (bob, mut rx) = transport("bob")?;

    let (first_io, _) = attach_client(&bob, "alice").await?;
    let first_id = bob.registry().get(&PeerId::from("alice")).ok_or("missing")?.id();
    let (_second_io, _) = attach_client(&bob, "alice").await?;
    let second = bob.registry().get(&PeerId::from("alice")).ok_or("missing")?;

    assert_ne!(second.id(), first_id);
    assert_eq!(bob.registry().len(), 1);

    // The replaced connection going away must not evict the new one.
    drop(first_io);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(bob.registry().len(), 1);
    while let Ok(ev) = rx.try_recv() {
        assert!(!matches!(ev, NetworkEvent::SessionClosed { .. }), "unexpected {ev:?}");
    }
    Ok(())
}

#[tokio::test]
async fn peer_disconnect_emits_one_close() -> TestResult {
    let (bob, mut rx) = transport("bob")?;
    let (alice_io, _) = attach_client(&bob, "alice").await?;

    drop(alice_io);
    let ev = wait_for(&mut rx, |e| matches!(e, NetworkEvent::SessionClosed { .. })).await?;
    assert!(matches!(ev, NetworkEvent::SessionClosed { ref peer, .. } if peer.as_str() == "alice"));
    assert!(bob.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn handshake_after_close_all_is_refused() -> TestResult {
    let (bob, mut rx) = transport("bob")?;
    bob.close_all().await;
    assert!(bob.is_closing());

    let identity = Identity::generate()?;
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
    let mut handshake = Handshake::new(&identity, "alice", Role::Initiator);
    let (accepted, _) = tokio::join!(
        bob.accept_stream(server_io, "duplex-alice".into()),
        handshake.run(&mut client_io, WAIT),
    );

    assert!(accepted.is_err());
    assert!(bob.registry().is_empty());
    assert!(rx.try_recv().is_err(), "no event for a refused session");
    Ok(())
}

#[tokio::test]
async fn hello_with_path_like_username_is_refused() -> TestResult {
    let (bob, _rx) = transport("bob")?;

    let identity = Identity::generate()?;
    let (mut client_io, server_io) = tokio::io::duplex(64 * 1024);
    let mut handshake = Handshake::new(&identity, "mallory/bob", Role::Initiator);
    let (accepted, dialed) = tokio::join!(
        bob.accept_stream(server_io, "duplex-mallory".into()),
        handshake.run(&mut client_io, WAIT),
    );

    assert!(accepted.is_err());
    assert!(dialed.is_err());
    assert!(bob.registry().is_empty());
    Ok(())
}

#[tokio::test]
async fn discovery_listener_dedupes_and_ignores_self() -> TestResult {
    let (tx, mut rx) = events::channel();
    let (stop_tx, stop_rx) = watch::channel(false);

    let socket = discovery::bind_listener(SocketAddr::from(([127, 0, 0, 1], 0))).await?;
    let listen_addr = socket.local_addr()?;
    let task = tokio::spawn(discovery::run_listener(
        socket,
        DiscoveryTracker::new("alice"),
        tx,
        stop_rx,
    ));

    let sender = UdpSocket::bind("127.0.0.1:0").await?;
    for datagram in [
        br#"{"user":"alice","port":6000}"#.as_slice(),
        br#"{"user":"bob","port":6001}"#.as_slice(),
        b"not json".as_slice(),
        br#"{"user":"bob","port":6001}"#.as_slice(),
        br#"{"user":"carol","port":6002}"#.as_slice(),
    ] {
        sender.send_to(datagram, listen_addr).await?;
    }

    let mut names = Vec::new();
    for _ in 0..2 {
        if let NetworkEvent::PeerDiscovered { username, port, .. } = next_event(&mut rx).await? {
            names.push((username, port));
        }
    }
    assert_eq!(names, vec![("bob".to_string(), 6001), ("carol".to_string(), 6002)]);

    let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
    assert!(extra.is_err(), "unexpected extra event: {extra:?}");

    let _ = stop_tx.send(true);
    task.await?;
    Ok(())
}

#[tokio::test]
async fn broadcaster_sends_announcement_immediately() -> TestResult {
    let receiver = UdpSocket::bind("127.0.0.1:0").await?;
    let target = receiver.local_addr()?;
    let (stop_tx, stop_rx) = watch::channel(false);

    let socket = discovery::bind_broadcaster().await?;
    let task = tokio::spawn(discovery::run_broadcaster(
        socket,
        target,
        Announcement {
            username: "alice".into(),
            p2p_port: 6000,
        },
        Duration::from_secs(30),
        stop_rx,
    ));

    let mut buf = [0u8; 256];
    let (n, _) = tokio::time::timeout(WAIT, receiver.recv_from(&mut buf)).await??;
    assert_eq!(Announcement::from_json(&buf[..n])?.username, "alice");

    let _ = stop_tx.send(true);
    task.await?;
    Ok(())
}
