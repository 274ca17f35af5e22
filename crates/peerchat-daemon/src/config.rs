//! CLI argument parsing and config file support.
//!
//! The daemon can be configured via CLI flags, a JSON config file,
//! or a combination of both (CLI overrides config file). Without
//! `--config`, `<config dir>/peerchat/config.json` is used if it
//! exists.

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;
use peerchat_types::config::AppConfig;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Peerchat: encrypted peer-to-peer group chat for the local network.
#[derive(Debug, Parser)]
#[command(name = "peerchat", version, about)]
pub struct CliArgs {
    /// Name announced to peers.
    #[arg(short, long)]
    pub username: Option<String>,

    /// TCP port for peer connections.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Address to bind the peer listener on.
    #[arg(long)]
    pub bind: Option<IpAddr>,

    /// Disable LAN discovery.
    #[arg(long)]
    pub no_discovery: bool,

    /// UDP port for discovery announcements.
    #[arg(long)]
    pub discovery_port: Option<u16>,

    /// Directory for history logs and received files.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Peer to connect to on start, as HOST:PORT (repeatable).
    #[arg(short, long = "connect", value_name = "HOST:PORT")]
    pub connect: Vec<String>,

    /// Load settings from a JSON config file.
    #[arg(long = "config", value_name = "PATH")]
    pub config_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Builds the effective configuration: file (explicit or default
/// location), then CLI overrides.
pub fn resolve(cli: &CliArgs) -> Result<AppConfig, String> {
    let base = match &cli.config_path {
        Some(path) => load(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                tracing::info!(path = %path.display(), "using default config file");
                load(&path)?
            }
            None => AppConfig::default(),
        },
    };
    let config = merge_cli(base, cli);
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

/// Loads an [`AppConfig`] from a JSON file. Missing keys take defaults.
///
/// Example `config.json`:
/// ```json
/// {
///   "username": "alice",
///   "listen_addr": "0.0.0.0:6000",
///   "discovery_enabled": true,
///   "history_dir": "/home/alice/.peerchat/history"
/// }
/// ```
pub fn load(path: &Path) -> Result<AppConfig, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read config file {}: {e}", path.display()))?;
    serde_json::from_str(&text).map_err(|e| format!("invalid config JSON in {}: {e}", path.display()))
}

/// Merges CLI overrides onto a config-file base.
pub fn merge_cli(mut config: AppConfig, cli: &CliArgs) -> AppConfig {
    if let Some(name) = &cli.username {
        config.username = name.clone();
    }
    if let Some(ip) = cli.bind {
        config.listen_addr = SocketAddr::new(ip, config.listen_addr.port());
    }
    if let Some(port) = cli.port {
        config.listen_addr.set_port(port);
    }
    if cli.no_discovery {
        config.discovery_enabled = false;
    }
    if let Some(port) = cli.discovery_port {
        config.discovery_bind.set_port(port);
        config.discovery_target.set_port(port);
    }
    if let Some(dir) = &cli.data_dir {
        config.history_dir = dir.join("history");
        config.download_dir = dir.join("downloads");
    }
    config
}

/// Splits `HOST:PORT`, accepting bracketed IPv6 hosts.
pub fn parse_host_port(raw: &str) -> Result<(String, u16), String> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST:PORT, got '{raw}'"))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err(format!("missing host in '{raw}'"));
    }
    let port = port
        .parse::<u16>()
        .map_err(|e| format!("invalid port in '{raw}': {e}"))?;
    Ok((host.to_string(), port))
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("peerchat").join("config.json"))
}
