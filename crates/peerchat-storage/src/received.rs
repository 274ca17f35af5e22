//! Reassembly of incoming file transfers.
//!
//! Chunks are appended in arrival order to `<dir>/recv_<name>`. The
//! first chunk of a transfer truncates any earlier file of that name;
//! later chunks append. Each open transfer owns its target file: when
//! `recv_<name>` is already being written by another peer, the newcomer
//! gets `recv_<peer>_<name>` instead (with a numeric suffix if that is
//! taken too).
//!
//! An end marker closes the transfer and is checked against the bytes
//! actually on disk. Senders that never send an end marker still get
//! their bytes on disk: the transfer simply stays open and keeps
//! appending.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use peerchat_crypto::hash::StreamingSha256;
use peerchat_types::{PeerChatError, PeerId, Result};

use crate::safe_file_name;

/// Prefix of reassembled file names.
pub const RECEIVED_PREFIX: &str = "recv_";

/// Read buffer used when hashing a finished file.
const HASH_BUF_LEN: usize = 8 * 1024;

/// Progress of one open transfer.
struct Transfer {
    path: PathBuf,
    chunks: u64,
}

type OpenTransfers = HashMap<(PeerId, String), Transfer>;

/// What the end marker claimed about a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedFile {
    /// Number of chunk envelopes the sender emitted.
    pub chunks: u64,
    /// Total size in bytes.
    pub size: u64,
    /// Lowercase hex SHA-256 of the whole file.
    pub sha256: String,
}

/// Result of closing a transfer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedFile {
    /// Sanitized file name (without the `recv_` prefix).
    pub name: String,
    /// Location on disk.
    pub path: PathBuf,
    /// Chunks written.
    pub chunks: u64,
    /// Size of the file on disk.
    pub size: u64,
    /// `true` when chunk count, size, and digest all matched the marker.
    pub verified: bool,
}

/// Sink for incoming file chunks, shared by all sessions.
pub struct ReceivedFiles {
    dir: PathBuf,
    open: Mutex<OpenTransfers>,
}

impl ReceivedFiles {
    /// Creates the sink, creating `dir` if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| PeerChatError::IoError {
            reason: format!("cannot create download dir {}: {e}", dir.display()),
        })?;
        Ok(Self {
            dir,
            open: Mutex::new(HashMap::new()),
        })
    }

    /// Preferred target path for a file announced as `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir
            .join(format!("{RECEIVED_PREFIX}{}", safe_file_name(name)))
    }

    /// Appends one chunk from `peer` to the file called `name`.
    ///
    /// Returns the path written to.
    pub fn append_chunk(&self, peer: &PeerId, name: &str, chunk: &[u8]) -> Result<PathBuf> {
        let safe = safe_file_name(name);
        let mut open = self.lock()?;
        let key = (peer.clone(), safe.clone());

        if !open.contains_key(&key) {
            let path = self.claim_path(&open, peer, &safe);
            // New transfer: start from an empty file.
            create_empty(&path)?;
            tracing::debug!(%peer, file = %safe, path = %path.display(), "file transfer started");
            open.insert(key.clone(), Transfer { path, chunks: 0 });
        }

        let transfer = open.get_mut(&key).ok_or_else(|| PeerChatError::IoError {
            reason: "transfer vanished while appending".into(),
        })?;

        let mut file = OpenOptions::new()
            .append(true)
            .open(&transfer.path)
            .map_err(|e| PeerChatError::IoError {
                reason: format!("cannot open {}: {e}", transfer.path.display()),
            })?;
        file.write_all(chunk).map_err(|e| PeerChatError::IoError {
            reason: format!("cannot append to {}: {e}", transfer.path.display()),
        })?;

        transfer.chunks += 1;
        Ok(transfer.path.clone())
    }

    /// Closes the transfer of `name` from `peer` and verifies it.
    ///
    /// Size and digest are taken from the file on disk. A marker with no
    /// preceding chunks produces an empty file.
    pub fn finish(&self, peer: &PeerId, name: &str, expected: &ExpectedFile) -> Result<ReceivedFile> {
        let safe = safe_file_name(name);
        let transfer = {
            let mut open = self.lock()?;
            match open.remove(&(peer.clone(), safe.clone())) {
                Some(t) => t,
                None => {
                    let path = self.claim_path(&open, peer, &safe);
                    create_empty(&path)?;
                    Transfer { path, chunks: 0 }
                }
            }
        };

        let (size, digest) = digest_file(&transfer.path)?;
        let verified = transfer.chunks == expected.chunks
            && size == expected.size
            && digest.eq_ignore_ascii_case(&expected.sha256);

        if !verified {
            tracing::warn!(
                %peer,
                file = %safe,
                got_chunks = transfer.chunks,
                want_chunks = expected.chunks,
                got_size = size,
                want_size = expected.size,
                "received file does not match its end marker"
            );
        }

        Ok(ReceivedFile {
            name: safe,
            path: transfer.path,
            chunks: transfer.chunks,
            size,
            verified,
        })
    }

    /// Drops every open transfer from `peer`, e.g. when its session ends.
    ///
    /// Partially written files stay on disk.
    pub fn abandon_peer(&self, peer: &PeerId) -> usize {
        match self.open.lock() {
            Ok(mut open) => {
                let before = open.len();
                open.retain(|(p, _), _| p != peer);
                before - open.len()
            }
            Err(_) => 0,
        }
    }

    /// Picks a target for a new transfer that no open transfer is using.
    fn claim_path(&self, open: &OpenTransfers, peer: &PeerId, safe: &str) -> PathBuf {
        let taken = |p: &Path| open.values().any(|t| t.path.as_path() == p);

        let preferred = self.path_for(safe);
        if !taken(preferred.as_path()) {
            return preferred;
        }

        let alternate = format!("{}_{safe}", safe_file_name(peer.as_str()));
        let mut candidate = self.path_for(&alternate);
        let mut n = 1u32;
        while taken(candidate.as_path()) {
            candidate = self.path_for(&format!("{alternate}.{n}"));
            n += 1;
        }
        tracing::info!(%peer, file = %safe, path = %candidate.display(), "file name in use, writing elsewhere");
        candidate
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, OpenTransfers>> {
        self.open.lock().map_err(|_| PeerChatError::IoError {
            reason: "received-files lock poisoned".into(),
        })
    }
}

fn create_empty(path: &Path) -> Result<()> {
    File::create(path).map_err(|e| PeerChatError::IoError {
        reason: format!("cannot create {}: {e}", path.display()),
    })?;
    Ok(())
}

/// Size and hex SHA-256 of the file at `path`.
fn digest_file(path: &Path) -> Result<(u64, String)> {
    let mut file = File::open(path).map_err(|e| PeerChatError::IoError {
        reason: format!("cannot open {}: {e}", path.display()),
    })?;
    let mut digest = StreamingSha256::new();
    let mut buf = [0u8; HASH_BUF_LEN];
    let mut size = 0u64;
    loop {
        let n = file.read(&mut buf).map_err(|e| PeerChatError::IoError {
            reason: format!("cannot read {}: {e}", path.display()),
        })?;
        if n == 0 {
            break;
        }
        digest.update(&buf[..n]);
        size += n as u64;
    }
    Ok((size, digest.finalize_hex()))
}
