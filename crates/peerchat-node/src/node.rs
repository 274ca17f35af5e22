//! Node lifecycle and state machine.
//!
//! The [`Node`] is the public entry point for the peerchat runtime.
//! It owns all subsystems and exposes a channel-based API for
//! front-ends (daemon REPL, tests).
//!
//! # State machine
//!
//! ```text
//! Initializing ──start()──▶ Running ──shutdown()──▶ ShuttingDown ──▶ (dropped)
//! ```
//!
//! - `Initializing`: identity generated, listener bound, storage open.
//! - `Running`: event loop active, accepting peers and commands.
//! - `ShuttingDown`: sessions being closed, tasks stopping.
//!
//! Double-start and shutdown-from-initializing are rejected with
//! `PeerChatError::ConfigError`.

use std::net::SocketAddr;
use std::sync::Arc;

use peerchat_crypto::identity::Identity;
use peerchat_network::config::NetworkConfig;
use peerchat_network::discovery;
use peerchat_network::events::{self, EventReceiver, EventSender};
use peerchat_network::transport::PeerTransport;
use peerchat_storage::history::HistoryLog;
use peerchat_storage::received::ReceivedFiles;
use peerchat_types::config::AppConfig;
use peerchat_types::{NodeEvent, PeerChatError, Result};
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::command::NodeCommand;
use crate::event_loop;
use crate::router::Router;

// ---------------------------------------------------------------------------
// Channel buffer sizes
// ---------------------------------------------------------------------------

/// Bounded command channel capacity.
const COMMAND_CHANNEL_SIZE: usize = 256;

/// Bounded node event channel capacity.
///
/// Larger than the command buffer to absorb bursts of incoming
/// messages and file chunks.
const EVENT_CHANNEL_SIZE: usize = 1024;

// ---------------------------------------------------------------------------
// NodeState
// ---------------------------------------------------------------------------

/// Lifecycle state of the node.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NodeState {
    /// Components created, event loop not started.
    Initializing,
    /// Event loop is active.
    Running,
    /// Graceful shutdown in progress.
    ShuttingDown,
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::Running => write!(f, "running"),
            Self::ShuttingDown => write!(f, "shutting_down"),
        }
    }
}

// ---------------------------------------------------------------------------
// NodeRuntime (internal)
// ---------------------------------------------------------------------------

/// Discovery sockets, bound up front so a port clash is logged early.
pub(crate) struct DiscoverySockets {
    pub listener: UdpSocket,
    pub broadcaster: UdpSocket,
}

/// Owned runtime state moved into the event loop task.
pub(crate) struct NodeRuntime {
    pub config: AppConfig,
    pub transport: Arc<PeerTransport>,
    pub router: Arc<Router>,
    pub history: Arc<HistoryLog>,
    pub received: Arc<ReceivedFiles>,
    pub listener: Option<TcpListener>,
    pub listen_addr: SocketAddr,
    pub discovery: Option<DiscoverySockets>,
    pub network_tx: EventSender,
    pub network_rx: EventReceiver,
    pub event_tx: mpsc::Sender<NodeEvent>,
    pub command_rx: mpsc::Receiver<NodeCommand>,
    pub shutdown_rx: watch::Receiver<bool>,
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// Peerchat node: owns all subsystems and drives the event loop.
///
/// After construction via [`Node::new`], call [`Node::start`] to
/// spawn the event loop. Interact through the channels:
///
/// - Send [`NodeCommand`]s via [`Node::command_sender`].
/// - Receive [`NodeEvent`]s via [`Node::take_event_receiver`].
/// - Shut down via [`NodeCommand::Shutdown`] or [`Node::shutdown`].
pub struct Node {
    state: NodeState,
    runtime: Option<NodeRuntime>,
    command_tx: mpsc::Sender<NodeCommand>,
    event_rx: Option<mpsc::Receiver<NodeEvent>>,
    shutdown_tx: watch::Sender<bool>,
    username: String,
    fingerprint: String,
    listen_addr: SocketAddr,
}

impl Node {
    /// Creates a node: validates `config`, generates a fresh identity,
    /// binds the peer listener, and opens the history and download
    /// directories.
    ///
    /// Discovery sockets are bound here too when enabled; if that
    /// fails the node runs without discovery.
    ///
    /// # Errors
    ///
    /// - `PeerChatError::ConfigError` if validation fails.
    /// - `PeerChatError::CryptoError` if key generation fails.
    /// - `PeerChatError::TransportError` if the listener cannot bind.
    /// - `PeerChatError::IoError` if a storage directory is unusable.
    pub async fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let identity = Arc::new(Identity::generate()?);
        tracing::info!(user = %config.username, fingerprint = %identity.fingerprint(), "identity generated");

        let (network_tx, network_rx) = events::channel();
        let transport = Arc::new(PeerTransport::new(
            NetworkConfig::from_app(&config),
            Arc::clone(&identity),
            network_tx.clone(),
        ));
        let listener = transport.bind().await?;
        let listen_addr = listener.local_addr().map_err(|e| PeerChatError::TransportError {
            reason: format!("cannot read listener address: {e}"),
        })?;

        let history = Arc::new(HistoryLog::open(&config.history_dir)?);
        let received = Arc::new(ReceivedFiles::open(&config.download_dir)?);
        let router = Arc::new(Router::new(
            Arc::clone(&transport),
            Arc::clone(&history),
            config.rate_limit_window(),
            config.send_timeout(),
        ));

        let discovery = if config.discovery_enabled {
            bind_discovery(&config).await
        } else {
            None
        };

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_SIZE);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let username = config.username.clone();
        let fingerprint = identity.fingerprint().to_string();

        let runtime = NodeRuntime {
            config,
            transport,
            router,
            history,
            received,
            listener: Some(listener),
            listen_addr,
            discovery,
            network_tx,
            network_rx,
            event_tx,
            command_rx,
            shutdown_rx,
        };

        Ok(Self {
            state: NodeState::Initializing,
            runtime: Some(runtime),
            command_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
            username,
            fingerprint,
            listen_addr,
        })
    }

    /// Starts the event loop in a new tokio task.
    ///
    /// Transitions `Initializing → Running`. The returned handle
    /// resolves once the loop has closed every session and stopped its
    /// tasks.
    ///
    /// # Errors
    ///
    /// - `PeerChatError::ConfigError` if the node is not in
    ///   `Initializing` state.
    pub fn start(&mut self) -> Result<JoinHandle<()>> {
        if self.state != NodeState::Initializing {
            return Err(PeerChatError::ConfigError {
                reason: format!("cannot start node in state '{}'; expected 'initializing'", self.state),
            });
        }

        let runtime = self.runtime.take().ok_or_else(|| PeerChatError::ConfigError {
            reason: "runtime already consumed (double start?)".into(),
        })?;

        let handle = tokio::spawn(event_loop::run_event_loop(runtime));
        self.state = NodeState::Running;
        Ok(handle)
    }

    /// Signals the event loop to exit.
    ///
    /// Idempotent once running. Await the handle returned by
    /// [`start`](Self::start) to wait for completion.
    ///
    /// # Errors
    ///
    /// - `PeerChatError::ConfigError` if the node was never started.
    pub fn shutdown(&mut self) -> Result<()> {
        match self.state {
            NodeState::Initializing => Err(PeerChatError::ConfigError {
                reason: "cannot shutdown a node that has not been started".into(),
            }),
            NodeState::ShuttingDown => Ok(()),
            NodeState::Running => {
                self.state = NodeState::ShuttingDown;
                let _ = self.shutdown_tx.send(true);
                Ok(())
            }
        }
    }

    /// Returns a sender for submitting commands to the node.
    pub fn command_sender(&self) -> mpsc::Sender<NodeCommand> {
        self.command_tx.clone()
    }

    /// Takes the event receiver (can only be called once).
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<NodeEvent>> {
        self.event_rx.take()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// Local username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Fingerprint of the local public key.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Address the peer listener actually bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}

async fn bind_discovery(config: &AppConfig) -> Option<DiscoverySockets> {
    let listener = match discovery::bind_listener(config.discovery_bind).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%e, "discovery disabled");
            return None;
        }
    };
    let broadcaster = match discovery::bind_broadcaster().await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(%e, "discovery disabled");
            return None;
        }
    };
    Some(DiscoverySockets {
        listener,
        broadcaster,
    })
}
