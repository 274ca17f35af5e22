//! Peerchat -- encrypted peer-to-peer group chat for the local network.
//!
//! Usage:
//!
//!   peerchat [OPTIONS]
//!
//! Options:
//!
//!   -u, --username <NAME>      Name announced to peers
//!   -p, --port <PORT>          TCP port for peer connections (default: 6000)
//!   --bind <IP>                Listener address (default: 0.0.0.0)
//!   --no-discovery             Disable LAN discovery
//!   --discovery-port <PORT>    UDP discovery port (default: 9999)
//!   --data-dir <PATH>          History and downloads directory
//!   -c, --connect <HOST:PORT>  Peer to connect to on start (repeatable)
//!   --config <PATH>            Load config from JSON file
//!
//! Environment:
//!
//!   RUST_LOG                   Log filter (default: info)
//!
//! The node runs until `/quit`, end of input, or Ctrl+C.

use clap::Parser;
use colored::Colorize;
use peerchat_node::command::NodeCommand;
use peerchat_node::node::Node;
use peerchat_types::config::AppConfig;
use tokio::sync::oneshot;

mod config;
mod repl;

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    // Tracing / logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = config::CliArgs::parse();

    let app_config = match config::resolve(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{} {e}", "error:".red().bold());
            std::process::exit(1);
        }
    };

    if let Err(e) = run_daemon(app_config, &cli.connect).await {
        tracing::error!("peerchat error: {e}");
        eprintln!("{} {e}", "error:".red().bold());
        std::process::exit(1);
    }
}

// ---------------------------------------------------------------------------
// Daemon main logic
// ---------------------------------------------------------------------------

async fn run_daemon(app_config: AppConfig, connect: &[String]) -> Result<(), String> {
    let discovery = app_config.discovery_enabled;
    let history_dir = app_config.history_dir.clone();
    let download_dir = app_config.download_dir.clone();

    // -----------------------------------------------------------------------
    // 1. Start node
    // -----------------------------------------------------------------------

    let mut node = Node::new(app_config)
        .await
        .map_err(|e| format!("node creation failed: {e}"))?;

    let events = node
        .take_event_receiver()
        .ok_or("node event receiver already taken")?;
    let command_tx = node.command_sender();

    let mut node_handle = node.start().map_err(|e| format!("node start failed: {e}"))?;

    tracing::info!("node started");

    // -----------------------------------------------------------------------
    // 2. Print status summary
    // -----------------------------------------------------------------------

    println!();
    println!("============================================================");
    println!("  Peerchat running as {}", node.username().bold());
    println!("============================================================");
    println!("  Listening:    {}", node.listen_addr());
    println!("  Fingerprint:  {}", node.fingerprint());
    println!("  Discovery:    {}", if discovery { "enabled" } else { "disabled" });
    println!("  History:      {}", history_dir.display());
    println!("  Downloads:    {}", download_dir.display());
    println!("============================================================");
    println!();

    let printer = tokio::spawn(repl::print_events(events));

    // -----------------------------------------------------------------------
    // 3. Initial connections
    // -----------------------------------------------------------------------

    for target in connect {
        let (address, port) = match config::parse_host_port(target) {
            Ok(hp) => hp,
            Err(e) => {
                tracing::warn!(%target, "skipping --connect: {e}");
                continue;
            }
        };
        let (reply, rx) = oneshot::channel();
        command_tx
            .send(NodeCommand::ConnectTo {
                address,
                port,
                name: None,
                reply,
            })
            .await
            .map_err(|_| "node stopped before initial connect".to_string())?;
        match rx.await {
            Ok(Ok(peer)) => tracing::info!(%target, %peer, "initial connect succeeded"),
            Ok(Err(e)) => tracing::warn!(%target, %e, "initial connect failed"),
            Err(_) => return Err("node stopped before initial connect".into()),
        }
    }

    // -----------------------------------------------------------------------
    // 4. Chat until quit
    // -----------------------------------------------------------------------

    let mut loop_exited = false;
    tokio::select! {
        result = repl::run(command_tx) => {
            if let Err(e) = result {
                tracing::warn!("input closed: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received Ctrl+C, shutting down...");
        }
        result = &mut node_handle => {
            loop_exited = true;
            match result {
                Ok(()) => tracing::error!("node event loop exited unexpectedly"),
                Err(e) => tracing::error!(%e, "node event loop panicked"),
            }
        }
    }

    // -----------------------------------------------------------------------
    // 5. Shutdown
    // -----------------------------------------------------------------------

    if !loop_exited {
        node.shutdown().map_err(|e| format!("shutdown failed: {e}"))?;
        if let Err(e) = node_handle.await {
            tracing::error!(%e, "node event loop panicked during shutdown");
        }
    }

    // The printer ends once the node drops its event sender.
    drop(node);
    let _ = printer.await;

    tracing::info!("peerchat stopped");
    Ok(())
}
