//! Line-based chat front-end.
//!
//! Reads stdin line by line. Plain text is broadcast to every peer;
//! slash commands drive the node. Node events are printed by a
//! separate task as they arrive.

use std::path::PathBuf;

use colored::Colorize;
use peerchat_node::command::NodeCommand;
use peerchat_types::{NodeEvent, PeerId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot};

use crate::config::parse_host_port;

// ---------------------------------------------------------------------------
// Input parsing
// ---------------------------------------------------------------------------

/// One parsed input line.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    /// Nothing to do.
    Empty,
    /// Send to everyone.
    Broadcast(String),
    /// Send to one user; other peers receive but do not display it.
    Private { to: String, text: String },
    /// Dial a peer.
    Connect {
        address: String,
        port: u16,
        name: Option<String>,
    },
    /// Send a file to one peer.
    File { peer: String, path: PathBuf },
    Peers,
    Status,
    Help,
    Quit,
}

/// Parses one line of user input.
pub fn parse_line(line: &str) -> Result<Input, String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(Input::Empty);
    }
    if !trimmed.starts_with('/') {
        return Ok(Input::Broadcast(trimmed.to_string()));
    }

    let (cmd, rest) = match trimmed.split_once(char::is_whitespace) {
        Some((cmd, rest)) => (cmd, rest.trim()),
        None => (trimmed, ""),
    };

    match cmd {
        "/quit" | "/exit" | "/q" => Ok(Input::Quit),
        "/peers" => Ok(Input::Peers),
        "/status" => Ok(Input::Status),
        "/help" | "/?" => Ok(Input::Help),

        "/msg" => {
            let (to, text) = rest
                .split_once(char::is_whitespace)
                .map(|(to, text)| (to, text.trim()))
                .ok_or("usage: /msg <user> <text>")?;
            if text.is_empty() {
                return Err("usage: /msg <user> <text>".into());
            }
            Ok(Input::Private {
                to: to.to_string(),
                text: text.to_string(),
            })
        }

        "/connect" => {
            let args: Vec<&str> = rest.split_whitespace().collect();
            let usage = "usage: /connect <host> <port> [name] or /connect <host:port> [name]";
            let (address, port, name) = match args.as_slice() {
                [hp] => {
                    let (h, p) = parse_host_port(hp)?;
                    (h, p, None)
                }
                [first, second] => match second.parse::<u16>() {
                    Ok(p) => (first.to_string(), p, None),
                    Err(_) => {
                        let (h, p) = parse_host_port(first)?;
                        (h, p, Some(second.to_string()))
                    }
                },
                [host, port, name] => {
                    let p = port.parse::<u16>().map_err(|e| format!("invalid port '{port}': {e}"))?;
                    (host.to_string(), p, Some(name.to_string()))
                }
                _ => return Err(usage.into()),
            };
            Ok(Input::Connect { address, port, name })
        }

        "/file" => {
            let (peer, path) = rest
                .split_once(char::is_whitespace)
                .map(|(peer, path)| (peer, path.trim()))
                .ok_or("usage: /file <peer> <path>")?;
            if path.is_empty() {
                return Err("usage: /file <peer> <path>".into());
            }
            Ok(Input::File {
                peer: peer.to_string(),
                path: PathBuf::from(path),
            })
        }

        other => Err(format!("unknown command '{other}' -- type /help")),
    }
}

// ---------------------------------------------------------------------------
// REPL loop
// ---------------------------------------------------------------------------

/// Runs until `/quit`, EOF, or the node goes away.
pub async fn run(commands: mpsc::Sender<NodeCommand>) -> Result<(), String> {
    print_help();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => return Err(format!("failed to read input: {e}")),
        };

        let input = match parse_line(&line) {
            Ok(input) => input,
            Err(e) => {
                print_error(&e);
                continue;
            }
        };

        match input {
            Input::Empty => {}
            Input::Quit => break,
            Input::Help => print_help(),
            Input::Broadcast(text) => broadcast(&commands, text, None).await?,
            Input::Private { to, text } => broadcast(&commands, text, Some(to)).await?,
            Input::Connect { address, port, name } => {
                let (reply, rx) = oneshot::channel();
                send(&commands, NodeCommand::ConnectTo { address: address.clone(), port, name, reply }).await?;
                // Connects may take a while; report in the background.
                tokio::spawn(async move {
                    match rx.await {
                        Ok(Ok(peer)) => println!("  {} {}", "connected to".green(), peer.as_str().bold()),
                        Ok(Err(e)) => print_error(&format!("connect to {address}:{port} failed: {e}")),
                        Err(_) => {}
                    }
                });
            }
            Input::File { peer, path } => {
                let (reply, rx) = oneshot::channel();
                send(&commands, NodeCommand::SendFile { peer: PeerId::new(peer), path, reply }).await?;
                tokio::spawn(async move {
                    match rx.await {
                        Ok(Ok(r)) => println!(
                            "  {} {} to {} ({} bytes, {} chunks)",
                            "sent".green(),
                            r.name,
                            r.peer.as_str().bold(),
                            r.size,
                            r.chunks
                        ),
                        Ok(Err(e)) => print_error(&format!("file transfer failed: {e}")),
                        Err(_) => {}
                    }
                });
            }
            Input::Peers => {
                let (reply, rx) = oneshot::channel();
                send(&commands, NodeCommand::ListPeers { reply }).await?;
                let peers = rx.await.map_err(|_| "node stopped".to_string())?;
                if peers.is_empty() {
                    println!("  {}", "(no peers connected)".dimmed());
                }
                for p in peers {
                    let dir = if p.inbound { "in" } else { "out" };
                    println!(
                        "  - {} [{dir}] {} since {}",
                        p.peer.as_str().bold(),
                        short_fingerprint(&p.fingerprint).dimmed(),
                        p.connected_at.format("%H:%M:%S"),
                    );
                }
            }
            Input::Status => {
                let (reply, rx) = oneshot::channel();
                send(&commands, NodeCommand::GetStatus { reply }).await?;
                let s = rx.await.map_err(|_| "node stopped".to_string())?;
                println!("{}: {}", "State".bold(), s.state.to_string().green());
                println!("{}: {}", "User".bold(), s.username);
                println!("{}: {}", "Listening".bold(), s.listen_addr);
                println!("{}: {}", "Fingerprint".bold(), s.fingerprint);
                println!("{}: {}", "Peers".bold(), s.peers);
                println!("{}: {}", "Up since".bold(), s.started_at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
        }
    }

    Ok(())
}

async fn send(commands: &mpsc::Sender<NodeCommand>, cmd: NodeCommand) -> Result<(), String> {
    commands.send(cmd).await.map_err(|_| "node stopped".to_string())
}

async fn broadcast(commands: &mpsc::Sender<NodeCommand>, text: String, to: Option<String>) -> Result<(), String> {
    let (reply, rx) = oneshot::channel();
    send(commands, NodeCommand::SendBroadcast { text, recipient: to, reply }).await?;
    let report = rx.await.map_err(|_| "node stopped".to_string())?;
    if report.total() == 0 {
        println!("  {}", "(no peers connected)".dimmed());
    }
    for peer in &report.rate_limited {
        println!("  {} {}", "rate limited:".yellow(), peer.as_str());
    }
    for (peer, reason) in &report.failed {
        print_error(&format!("send to {} failed: {reason}", peer.as_str()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Event printing
// ---------------------------------------------------------------------------

/// Prints node events until the channel closes.
pub async fn print_events(mut events: mpsc::Receiver<NodeEvent>) {
    while let Some(event) = events.recv().await {
        println!("{}", render_event(&event));
    }
}

/// Human-readable form of one event.
pub fn render_event(event: &NodeEvent) -> String {
    match event {
        NodeEvent::PeerJoined { peer, inbound, .. } => {
            let how = if *inbound { "connected to us" } else { "connected" };
            format!("{} {} {how}", "*".green(), peer.as_str().bold())
        }
        NodeEvent::PeerLeft { peer } => format!("{} {} left", "*".yellow(), peer.as_str().bold()),
        NodeEvent::MessageReceived {
            sender,
            text,
            private,
            timestamp,
            ..
        } => {
            let time = chrono::DateTime::from_timestamp(*timestamp as i64, 0)
                .map(|t| t.with_timezone(&chrono::Local).format("%H:%M:%S").to_string())
                .unwrap_or_default();
            if *private {
                format!("[{time}] {} {}: {text}", "(private)".magenta(), sender.cyan().bold())
            } else {
                format!("[{time}] {}: {text}", sender.cyan().bold())
            }
        }
        NodeEvent::FingerprintSeen { peer, fingerprint } => format!(
            "{} new key from {}: {}",
            "!".yellow().bold(),
            peer.as_str().bold(),
            fingerprint
        ),
        NodeEvent::PeerDiscovered { username, address, port } => format!(
            "{} discovered {} at {address}:{port} (use /connect {address} {port})",
            "?".blue(),
            username.bold()
        ),
        NodeEvent::FileReceived {
            peer,
            name,
            path,
            size,
            verified,
        } => {
            let check = if *verified { "verified".green() } else { "NOT verified".red().bold() };
            format!(
                "{} {name} from {} ({size} bytes, {check}) saved to {}",
                "+".green(),
                peer.as_str().bold(),
                path.display()
            )
        }
        NodeEvent::BroadcastSent { delivered, .. } => {
            format!("  {}", format!("sent to {delivered} peer(s)").dimmed())
        }
    }
}

fn short_fingerprint(fp: &str) -> &str {
    fp.get(..16).unwrap_or(fp)
}

fn print_error(msg: &str) {
    eprintln!("{} {}", "error:".red().bold(), msg);
}

fn print_help() {
    println!("Commands:");
    println!("  <text>                         send to everyone");
    println!("  /msg <user> <text>             private message");
    println!("  /connect <host> <port> [name]  connect to a peer");
    println!("  /file <peer> <path>            send a file");
    println!("  /peers                         list connected peers");
    println!("  /status                        show node status");
    println!("  /quit                          exit");
}
