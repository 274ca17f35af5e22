//! Main event loop driving all node subsystems.
//!
//! [`run_event_loop`] is spawned as a tokio task by `Node::start`. It
//! starts the accept loop and, when enabled, the discovery tasks, then
//! uses `tokio::select!` to multiplex:
//!
//! 1. **Network events**: sessions, envelopes, discovery.
//! 2. **Commands**: connect, broadcast, file send, queries, shutdown.
//! 3. **Worker completions**: connect/broadcast/file tasks finishing.
//! 4. **Shutdown signal**: graceful exit via `watch` channel.
//!
//! Inbound events are handled in arrival order on the loop itself, so
//! a peer's history and notifications follow its frame order. Outbound
//! work runs on tracked worker tasks.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use peerchat_network::discovery::{self, DiscoveryTracker};
use peerchat_network::transport::PeerTransport;
use peerchat_protocol::discovery::Announcement;
use peerchat_types::{NodeEvent, PeerChatError, PeerId, Result};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::command::{NodeCommand, NodeStatus, PeerInfo};
use crate::file_transfer;
use crate::incoming::{self, Inbound};
use crate::node::{NodeRuntime, NodeState};

// ---------------------------------------------------------------------------
// Event loop entry point
// ---------------------------------------------------------------------------

/// Runs the node event loop until shutdown is signalled.
pub(crate) async fn run_event_loop(mut rt: NodeRuntime) {
    let started_at = Utc::now();
    tracing::info!(user = %rt.config.username, addr = %rt.listen_addr, "node event loop started");

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut services = JoinSet::new();
    let mut workers = JoinSet::new();

    if let Some(listener) = rt.listener.take() {
        services.spawn(Arc::clone(&rt.transport).run_accept_loop(listener, stop_rx.clone()));
    }

    if let Some(sockets) = rt.discovery.take() {
        let announcement = Announcement {
            username: rt.config.username.clone(),
            p2p_port: rt.listen_addr.port(),
        };
        services.spawn(discovery::run_broadcaster(
            sockets.broadcaster,
            rt.config.discovery_target,
            announcement,
            rt.config.discovery_interval(),
            stop_rx.clone(),
        ));
        services.spawn(discovery::run_listener(
            sockets.listener,
            DiscoveryTracker::new(rt.config.username.clone()),
            rt.network_tx.clone(),
            stop_rx.clone(),
        ));
    } else {
        tracing::info!("discovery not running");
    }

    loop {
        tokio::select! {
            // ---------------------------------------------------------------
            // 1. Network events.
            // ---------------------------------------------------------------
            Some(net_event) = rt.network_rx.recv() => {
                let ctx = Inbound {
                    local_username: &rt.config.username,
                    history: &rt.history,
                    received: &rt.received,
                    limiter: rt.router.limiter(),
                    event_tx: &rt.event_tx,
                };
                incoming::handle_network_event(net_event, &ctx).await;
            }

            // ---------------------------------------------------------------
            // 2. Commands from the front-end.
            // ---------------------------------------------------------------
            Some(cmd) = rt.command_rx.recv() => {
                tracing::debug!(?cmd, "command received");
                if handle_command(cmd, &rt, started_at, &mut workers) {
                    tracing::info!("shutdown command received -- exiting event loop");
                    break;
                }
            }

            // ---------------------------------------------------------------
            // 3. Worker completions.
            // ---------------------------------------------------------------
            Some(joined) = workers.join_next(), if !workers.is_empty() => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        tracing::error!(%e, "worker task panicked");
                    }
                }
            }

            // ---------------------------------------------------------------
            // 4. Shutdown signal via watch channel.
            // ---------------------------------------------------------------
            changed = rt.shutdown_rx.changed() => {
                if changed.is_err() || *rt.shutdown_rx.borrow() {
                    tracing::info!("shutdown signal received -- exiting event loop");
                    break;
                }
            }
        }
    }

    // Graceful shutdown sequence. The accept loop goes before close_all.
    let _ = stop_tx.send(true);
    workers.shutdown().await;
    services.shutdown().await;
    rt.transport.close_all().await;

    tracing::info!("node event loop exited");
}

// ---------------------------------------------------------------------------
// Command handler
// ---------------------------------------------------------------------------

/// Processes a single node command.
///
/// Returns `true` if the event loop should exit. Anything that touches
/// the network is moved onto a worker task.
fn handle_command(
    cmd: NodeCommand,
    rt: &NodeRuntime,
    started_at: DateTime<Utc>,
    workers: &mut JoinSet<()>,
) -> bool {
    match cmd {
        NodeCommand::ConnectTo {
            address,
            port,
            name,
            reply,
        } => {
            let transport = Arc::clone(&rt.transport);
            workers.spawn(async move {
                let result = connect_to(&transport, &address, port, name).await;
                if let Err(e) = &result {
                    tracing::warn!(%address, port, %e, "connect failed");
                }
                let _ = reply.send(result);
            });
            false
        }

        NodeCommand::SendBroadcast {
            text,
            recipient,
            reply,
        } => {
            let router = Arc::clone(&rt.router);
            let event_tx = rt.event_tx.clone();
            workers.spawn(async move {
                let report = router.send_broadcast(&text, recipient).await;
                let _ = event_tx
                    .send(NodeEvent::BroadcastSent {
                        text,
                        delivered: report.delivered.len(),
                    })
                    .await;
                let _ = reply.send(report);
            });
            false
        }

        NodeCommand::SendFile { peer, path, reply } => {
            let router = Arc::clone(&rt.router);
            let chunk_size = rt.config.file_chunk_size;
            workers.spawn(async move {
                let result = file_transfer::send_file(&router, &peer, &path, chunk_size).await;
                if let Err(e) = &result {
                    tracing::warn!(%peer, path = %path.display(), %e, "file transfer failed");
                }
                let _ = reply.send(result);
            });
            false
        }

        NodeCommand::ListPeers { reply } => {
            let _ = reply.send(list_peers(&rt.transport));
            false
        }

        NodeCommand::GetStatus { reply } => {
            let _ = reply.send(build_status(rt, started_at));
            false
        }

        NodeCommand::Shutdown => true,
    }
}

/// Resolves `address:port` and connects to the first address that works.
async fn connect_to(
    transport: &PeerTransport,
    address: &str,
    port: u16,
    name: Option<String>,
) -> Result<PeerId> {
    let candidates: Vec<SocketAddr> = tokio::net::lookup_host((address, port))
        .await
        .map_err(|e| PeerChatError::TransportError {
            reason: format!("cannot resolve {address}: {e}"),
        })?
        .collect();

    let mut last_err = PeerChatError::TransportError {
        reason: format!("{address} resolved to no addresses"),
    };
    for addr in candidates {
        match transport.connect(addr, name.clone()).await {
            Ok(peer) => return Ok(peer),
            Err(e) => last_err = e,
        }
    }
    Err(last_err)
}

fn list_peers(transport: &PeerTransport) -> Vec<PeerInfo> {
    let mut peers: Vec<PeerInfo> = transport
        .registry()
        .snapshot()
        .iter()
        .map(|s| PeerInfo {
            peer: s.peer().clone(),
            session_id: s.id(),
            fingerprint: s.fingerprint().to_string(),
            inbound: s.is_inbound(),
            connected_at: s.created_at(),
        })
        .collect();
    peers.sort_by(|a, b| a.peer.cmp(&b.peer));
    peers
}

fn build_status(rt: &NodeRuntime, started_at: DateTime<Utc>) -> NodeStatus {
    NodeStatus {
        state: NodeState::Running,
        username: rt.config.username.clone(),
        fingerprint: rt.transport.identity().fingerprint().to_string(),
        listen_addr: rt.listen_addr,
        peers: rt.transport.registry().len(),
        started_at,
    }
}
