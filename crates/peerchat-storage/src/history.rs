//! Append-only encrypted conversation history.
//!
//! Every envelope sent to or accepted from a peer is appended to
//! `<dir>/<peer>.dat` as the sealed blob, hex encoded, one record per
//! line. The log never holds plaintext; reading it back requires the
//! session key that sealed each record.
//!
//! # File format
//!
//! ```text
//! <hex(nonce || ciphertext)>\n
//! <hex(nonce || ciphertext)>\n
//! ...
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use peerchat_types::{PeerChatError, PeerId, Result};

use crate::safe_file_name;

/// File extension of per-peer history files.
const HISTORY_EXT: &str = "dat";

/// Marks a hex-encoded file stem.
const ENCODED_PREFIX: char = '%';

/// Per-peer history log rooted at one directory.
pub struct HistoryLog {
    dir: PathBuf,
    /// Serializes appends so concurrent sends never interleave lines.
    write_lock: Mutex<()>,
}

impl HistoryLog {
    /// Opens (and creates if needed) the history directory.
    ///
    /// # Errors
    ///
    /// [`PeerChatError::IoError`] if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| PeerChatError::IoError {
            reason: format!("cannot create history dir {}: {e}", dir.display()),
        })?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of the log.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Location of `peer`'s history file.
    ///
    /// Plain names map to `<name>.dat`. Any other id (path separators,
    /// awkward characters, a leading `%`) maps to `%<hex of id>.dat`, so
    /// two distinct peers never share a file.
    pub fn path_for(&self, peer: &PeerId) -> PathBuf {
        self.dir.join(format!("{}.{HISTORY_EXT}", file_stem(peer)))
    }

    /// Appends one sealed record to `peer`'s history.
    ///
    /// # Errors
    ///
    /// [`PeerChatError::IoError`] if the file cannot be opened or written.
    pub fn append(&self, peer: &PeerId, sealed: &[u8]) -> Result<()> {
        let mut line = hex::encode(sealed);
        line.push('\n');

        let path = self.path_for(peer);
        let _guard = self.write_lock.lock().map_err(|_| PeerChatError::IoError {
            reason: "history lock poisoned".into(),
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| PeerChatError::IoError {
                reason: format!("cannot open history {}: {e}", path.display()),
            })?;
        file.write_all(line.as_bytes()).map_err(|e| PeerChatError::IoError {
            reason: format!("cannot append history {}: {e}", path.display()),
        })?;

        tracing::trace!(%peer, bytes = sealed.len(), "history record appended");
        Ok(())
    }

    /// Reads every record stored for `peer`, oldest first.
    ///
    /// A peer without history yields an empty list. Lines that are not
    /// valid hex are skipped with a warning.
    pub fn records(&self, peer: &PeerId) -> Result<Vec<Vec<u8>>> {
        let path = self.path_for(peer);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PeerChatError::IoError {
                    reason: format!("cannot read history {}: {e}", path.display()),
                })
            }
        };

        let mut out = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match hex::decode(line) {
                Ok(bytes) => out.push(bytes),
                Err(e) => tracing::warn!(%peer, lineno, %e, "skipping corrupt history line"),
            }
        }
        Ok(out)
    }

    /// Number of records stored for `peer`.
    pub fn record_count(&self, peer: &PeerId) -> Result<usize> {
        Ok(self.records(peer)?.len())
    }
}

/// File-name stem for `peer`, injective over all peer ids.
fn file_stem(peer: &PeerId) -> String {
    let name = peer.as_str();
    if safe_file_name(name) == name && !name.starts_with(ENCODED_PREFIX) {
        name.to_string()
    } else {
        format!("{ENCODED_PREFIX}{}", hex::encode(name))
    }
}
