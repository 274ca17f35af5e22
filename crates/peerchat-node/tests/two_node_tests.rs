//! End-to-end tests: real nodes on loopback talking through the
//! command/event API.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use peerchat_crypto::hash::sha256_hex;
use peerchat_node::command::NodeCommand;
use peerchat_node::node::{Node, NodeState};
use peerchat_node::router::BroadcastReport;
use peerchat_storage::history::HistoryLog;
use peerchat_types::config::AppConfig;
use peerchat_types::{NodeEvent, PeerChatError, PeerId};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type TestResult = std::result::Result<(), Box<dyn std::error::Error>>;
type BoxResult<T> = std::result::Result<T, Box<dyn std::error::Error>>;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const WAIT: Duration = Duration::from_secs(10);

static COUNTER: AtomicU32 = AtomicU32::new(0);

/// Returns a unique temporary directory for each node.
fn temp_dir() -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let dir = std::env::temp_dir().join(format!(
        "peerchat-node-test-{}-{}-{}",
        std::process::id(),
        id,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    ));
    let _ = std::fs::create_dir_all(&dir);
    dir
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("peerchat_node=debug,peerchat_network=debug")
        .with_test_writer()
        .try_init();
}

struct TestNode {
    node: Node,
    handle: JoinHandle<()>,
    events: mpsc::Receiver<NodeEvent>,
    commands: mpsc::Sender<NodeCommand>,
    dir: PathBuf,
}

impl TestNode {
    async fn spawn(username: &str) -> BoxResult<Self> {
        let dir = temp_dir();
        let config = AppConfig {
            username: username.into(),
            listen_addr: "127.0.0.1:0".parse()?,
            discovery_enabled: false,
            connect_retries: 0,
            history_dir: dir.join("history"),
            download_dir: dir.join("downloads"),
            ..AppConfig::default()
        };

        let mut node = Node::new(config).await?;
        let events = node.take_event_receiver().ok_or("event receiver taken")?;
        let commands = node.command_sender();
        let handle = node.start()?;
        Ok(Self {
            node,
            handle,
            events,
            commands,
            dir,
        })
    }

    fn history(&self) -> BoxResult<HistoryLog> {
        Ok(HistoryLog::open(self.dir.join("history"))?)
    }

    async fn connect(&self, other: &TestNode) -> BoxResult<PeerId> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::ConnectTo {
                address: "127.0.0.1".into(),
                port: other.node.listen_addr().port(),
                name: None,
                reply,
            })
            .await?;
        Ok(rx.await??)
    }

    async fn broadcast(&self, text: &str, recipient: Option<&str>) -> BoxResult<BroadcastReport> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::SendBroadcast {
                text: text.into(),
                recipient: recipient.map(str::to_string),
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    async fn send_file(&self, peer: &str, path: PathBuf) -> BoxResult<peerchat_types::Result<peerchat_node::file_transfer::FileSendReport>> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(NodeCommand::SendFile {
                peer: PeerId::from(peer),
                path,
                reply,
            })
            .await?;
        Ok(rx.await?)
    }

    /// Skips events until one matches `pred`.
    async fn wait_for<F>(&mut self, mut pred: F) -> BoxResult<NodeEvent>
    where
        F: FnMut(&NodeEvent) -> bool,
    {
        loop {
            match tokio::time::timeout(WAIT, self.events.recv()).await {
                Ok(Some(ev)) if pred(&ev) => return Ok(ev),
                Ok(Some(_)) => continue,
                Ok(None) => return Err("event channel closed".into()),
                Err(_) => return Err("timed out waiting for node event".into()),
            }
        }
    }

    /// Asserts no event matching `pred` shows up for a short while.
    async fn expect_none<F>(&mut self, mut pred: F) -> TestResult
    where
        F: FnMut(&NodeEvent) -> bool,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_millis(300);
        while let Ok(Some(ev)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            if pred(&ev) {
                return Err(format!("unexpected event {ev:?}").into());
            }
        }
        Ok(())
    }

    async fn stop(mut self) -> TestResult {
        self.node.shutdown()?;
        tokio::time::timeout(WAIT, self.handle).await??;
        Ok(())
    }
}

/// Connects `a` to `b` and waits until both sides have registered.
async fn link(a: &mut TestNode, b: &mut TestNode) -> TestResult {
    let peer = a.connect(b).await?;
    assert_eq!(peer.as_str(), b.node.username());
    let a_name = a.node.username().to_string();
    b.wait_for(|e| matches!(e, NodeEvent::PeerJoined { peer, .. } if peer.as_str() == a_name))
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Messaging
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hi_reaches_peer_with_one_history_record() -> TestResult {
    init_tracing();
    let mut alice = TestNode::spawn("alice").await?;
    let mut bob = TestNode::spawn("bob").await?;
    link(&mut alice, &mut bob).await?;

    let report = alice.broadcast("hi", None).await?;
    assert_eq!(report.delivered, vec![PeerId::from("bob")]);
    assert!(report.rate_limited.is_empty() && report.failed.is_empty());

    let ev = bob
        .wait_for(|e| matches!(e, NodeEvent::MessageReceived { .. }))
        .await?;
    match ev {
        NodeEvent::MessageReceived {
            peer,
            sender,
            text,
            private,
            ..
        } => {
            assert_eq!(peer, PeerId::from("alice"));
            assert_eq!(sender, "alice");
            assert_eq!(text, "hi");
            assert!(!private);
        }
        other => return Err(format!("unexpected {other:?}").into()),
    }

    assert_eq!(bob.history()?.record_count(&PeerId::from("alice"))?, 1);
    assert_eq!(alice.history()?.record_count(&PeerId::from("bob"))?, 1);

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test]
async fn second_send_within_window_is_rate_limited() -> TestResult {
    let mut alice = TestNode::spawn("alice").await?;
    let mut bob = TestNode::spawn("bob").await?;
    link(&mut alice, &mut bob).await?;

    let first = alice.broadcast("one", None).await?;
    let second = alice.broadcast("two", None).await?;
    assert_eq!(first.delivered, vec![PeerId::from("bob")]);
    assert!(second.delivered.is_empty());
    assert_eq!(second.rate_limited, vec![PeerId::from("bob")]);

    bob.wait_for(|e| matches!(e, NodeEvent::MessageReceived { text, .. } if text == "one"))
        .await?;
    bob.expect_none(|e| matches!(e, NodeEvent::MessageReceived { .. }))
        .await?;
    assert_eq!(bob.history()?.record_count(&PeerId::from("alice"))?, 1);

    // Window elapses; sending works again.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let third = alice.broadcast("three", None).await?;
    assert_eq!(third.delivered, vec![PeerId::from("bob")]);

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test]
async fn private_message_shown_only_to_recipient() -> TestResult {
    let mut alice = TestNode::spawn("alice").await?;
    let mut bob = TestNode::spawn("bob").await?;
    let mut carol = TestNode::spawn("carol").await?;
    link(&mut alice, &mut bob).await?;
    link(&mut alice, &mut carol).await?;

    let report = alice.broadcast("psst", Some("carol")).await?;
    assert_eq!(report.delivered.len(), 2);

    let ev = carol
        .wait_for(|e| matches!(e, NodeEvent::MessageReceived { .. }))
        .await?;
    assert!(matches!(ev, NodeEvent::MessageReceived { private: true, ref text, .. } if text == "psst"));

    bob.expect_none(|e| matches!(e, NodeEvent::MessageReceived { .. }))
        .await?;
    // Still logged at bob even though it was not shown.
    assert_eq!(bob.history()?.record_count(&PeerId::from("alice"))?, 1);

    alice.stop().await?;
    bob.stop().await?;
    carol.stop().await
}

// ---------------------------------------------------------------------------
// File transfer
// ---------------------------------------------------------------------------

async fn transfer_and_check(alice: &TestNode, bob: &mut TestNode, name: &str, data: &[u8]) -> TestResult {
    let path = alice.dir.join(name);
    std::fs::write(&path, data)?;

    let report = alice.send_file("bob", path).await??;
    assert_eq!(report.size, data.len() as u64);
    assert_eq!(report.sha256, sha256_hex(data));

    let ev = bob
        .wait_for(|e| matches!(e, NodeEvent::FileReceived { .. }))
        .await?;
    match ev {
        NodeEvent::FileReceived {
            peer,
            name: got_name,
            path,
            size,
            verified,
        } => {
            assert_eq!(peer, PeerId::from("alice"));
            assert_eq!(got_name, name);
            assert_eq!(path, bob.dir.join("downloads").join(format!("recv_{name}")));
            assert_eq!(size, data.len() as u64);
            assert!(verified);
            assert_eq!(std::fs::read(&path)?, data);
        }
        other => return Err(format!("unexpected {other:?}").into()),
    }
    Ok(())
}

#[tokio::test]
async fn file_of_2500_bytes_arrives_in_three_chunks() -> TestResult {
    init_tracing();
    let mut alice = TestNode::spawn("alice").await?;
    let mut bob = TestNode::spawn("bob").await?;
    link(&mut alice, &mut bob).await?;

    let data: Vec<u8> = (0..2500u32).map(|i| (i * 7 % 256) as u8).collect();
    let path = alice.dir.join("report.bin");
    std::fs::write(&path, &data)?;
    let report = alice.send_file("bob", path).await??;
    assert_eq!(report.chunks, 3);
    assert_eq!(report.name, "report.bin");

    let ev = bob
        .wait_for(|e| matches!(e, NodeEvent::FileReceived { .. }))
        .await?;
    assert!(matches!(ev, NodeEvent::FileReceived { verified: true, size: 2500, .. }));
    let received = std::fs::read(bob.dir.join("downloads").join("recv_report.bin"))?;
    assert_eq!(received, data);

    // Three chunks plus the end marker.
    assert_eq!(bob.history()?.record_count(&PeerId::from("alice"))?, 4);

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test]
async fn empty_and_one_byte_files() -> TestResult {
    let mut alice = TestNode::spawn("alice").await?;
    let mut bob = TestNode::spawn("bob").await?;
    link(&mut alice, &mut bob).await?;

    transfer_and_check(&alice, &mut bob, "empty.txt", &[]).await?;
    transfer_and_check(&alice, &mut bob, "one.txt", b"x").await?;
    transfer_and_check(&alice, &mut bob, "exact.bin", &[9u8; 2048]).await?;

    alice.stop().await?;
    bob.stop().await
}

#[tokio::test]
async fn file_to_unknown_peer_fails() -> TestResult {
    let alice = TestNode::spawn("alice").await?;
    let path = alice.dir.join("a.txt");
    std::fs::write(&path, b"data")?;

    let res = alice.send_file("nobody", path).await?;
    assert!(matches!(res, Err(PeerChatError::UnknownPeer { .. })));

    alice.stop().await
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_before_start_rejected() -> TestResult {
    let dir = temp_dir();
    let config = AppConfig {
        username: "alice".into(),
        listen_addr: "127.0.0.1:0".parse()?,
        discovery_enabled: false,
        history_dir: dir.join("history"),
        download_dir: dir.join("downloads"),
        ..AppConfig::default()
    };
    let mut node = Node::new(config).await?;
    assert_eq!(node.state(), NodeState::Initializing);
    assert!(matches!(node.shutdown(), Err(PeerChatError::ConfigError { .. })));

    let handle = node.start()?;
    assert!(node.start().is_err());
    node.shutdown()?;
    node.shutdown()?;
    assert_eq!(node.state(), NodeState::ShuttingDown);
    tokio::time::timeout(WAIT, handle).await??;
    Ok(())
}

#[tokio::test]
async fn invalid_config_rejected() -> TestResult {
    let config = AppConfig {
        username: "  ".into(),
        ..AppConfig::default()
    };
    assert!(matches!(Node::new(config).await, Err(PeerChatError::ConfigError { .. })));
    Ok(())
}

#[tokio::test]
async fn status_peers_and_peer_left_on_shutdown() -> TestResult {
    let mut alice = TestNode::spawn("alice").await?;
    let mut bob = TestNode::spawn("bob").await?;
    link(&mut alice, &mut bob).await?;

    let (reply, rx) = oneshot::channel();
    alice.commands.send(NodeCommand::ListPeers { reply }).await?;
    let peers = rx.await?;
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].peer, PeerId::from("bob"));
    assert!(!peers[0].inbound);
    assert_eq!(peers[0].fingerprint, bob.node.fingerprint());

    let (reply, rx) = oneshot::channel();
    alice.commands.send(NodeCommand::GetStatus { reply }).await?;
    let status = rx.await?;
    assert_eq!(status.state, NodeState::Running);
    assert_eq!(status.username, "alice");
    assert_eq!(status.peers, 1);
    assert_eq!(status.listen_addr, alice.node.listen_addr());

    alice.commands.send(NodeCommand::Shutdown).await?;
    tokio::time::timeout(WAIT, &mut alice.handle).await??;

    let ev = bob
        .wait_for(|e| matches!(e, NodeEvent::PeerLeft { .. }))
        .await?;
    assert!(matches!(ev, NodeEvent::PeerLeft { ref peer } if peer.as_str() == "alice"));
    bob.expect_none(|e| matches!(e, NodeEvent::PeerLeft { .. }))
        .await?;

    bob.stop().await
}

#[tokio::test]
async fn connect_to_closed_port_reports_error() -> TestResult {
    let alice = TestNode::spawn("alice").await?;
    let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();

    let (reply, rx) = oneshot::channel();
    alice
        .commands
        .send(NodeCommand::ConnectTo {
            address: "127.0.0.1".into(),
            port,
            name: None,
            reply,
        })
        .await?;
    assert!(matches!(rx.await?, Err(PeerChatError::TransportError { .. })));

    alice.stop().await
}
