//! Outbound file transfer.
//!
//! A file is read in fixed-size chunks; every chunk except the last is
//! exactly `chunk_size` bytes. Each chunk goes out as one
//! [`Envelope::FileChunk`], in order, on the peer's session. A final
//! [`Envelope::FileEnd`] carries the chunk count, byte count and
//! SHA-256 of the whole file so the receiver can verify it.

use std::path::Path;

use peerchat_crypto::hash::StreamingSha256;
use peerchat_protocol::envelope::Envelope;
use peerchat_types::{PeerChatError, PeerId, Result};
use tokio::io::AsyncReadExt;

use crate::router::Router;

/// What was sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileSendReport {
    /// Receiving peer.
    pub peer: PeerId,
    /// Base name announced to the receiver.
    pub name: String,
    /// Number of chunk envelopes written.
    pub chunks: u64,
    /// Total bytes sent.
    pub size: u64,
    /// Lowercase hex SHA-256 of the file.
    pub sha256: String,
}

/// Streams the file at `path` to `peer`.
///
/// # Errors
///
/// - [`PeerChatError::UnknownPeer`] if there is no live session.
/// - [`PeerChatError::IoError`] if the file cannot be opened or read.
/// - [`PeerChatError::TransportError`] if a write fails; the session
///   is torn down and the transfer stops.
pub async fn send_file(router: &Router, peer: &PeerId, path: &Path, chunk_size: usize) -> Result<FileSendReport> {
    if chunk_size == 0 {
        return Err(PeerChatError::ConfigError {
            reason: "file chunk size must be greater than 0".into(),
        });
    }

    let session = router.session_for(peer)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PeerChatError::IoError {
            reason: format!("{} has no file name", path.display()),
        })?;

    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| PeerChatError::IoError {
            reason: format!("cannot open {}: {e}", path.display()),
        })?;

    tracing::info!(%peer, file = %name, "file transfer started");

    let mut digest = StreamingSha256::new();
    let mut chunks = 0u64;
    let mut size = 0u64;
    let mut buf = vec![0u8; chunk_size];

    loop {
        let n = fill_chunk(&mut file, &mut buf)
            .await
            .map_err(|e| PeerChatError::IoError {
                reason: format!("cannot read {}: {e}", path.display()),
            })?;
        if n == 0 {
            break;
        }

        let chunk = &buf[..n];
        digest.update(chunk);
        router
            .send_to(
                &session,
                &Envelope::FileChunk {
                    name: name.clone(),
                    chunk: chunk.to_vec(),
                },
            )
            .await?;

        chunks += 1;
        size += n as u64;
        if n < chunk_size {
            break;
        }
    }

    let sha256 = digest.finalize_hex();
    router
        .send_to(
            &session,
            &Envelope::FileEnd {
                name: name.clone(),
                chunks,
                size,
                sha256: sha256.clone(),
            },
        )
        .await?;

    tracing::info!(%peer, file = %name, chunks, size, "file transfer finished");
    Ok(FileSendReport {
        peer: peer.clone(),
        name,
        chunks,
        size,
        sha256,
    })
}

/// Reads until `buf` is full or EOF. Returns the number of bytes read.
async fn fill_chunk<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}
