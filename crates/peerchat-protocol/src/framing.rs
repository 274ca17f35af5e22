//! Length-prefixed framing over any async byte stream.
//!
//! A frame is a 4-byte big-endian payload length followed by exactly
//! that many payload bytes. One frame carries one handshake message or
//! one sealed envelope, so a receiver never has to guess where a
//! ciphertext ends.

use std::io::ErrorKind;

use peerchat_types::{PeerChatError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default cap on a session frame payload (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Cap on handshake frames. Hellos carry a username and a PEM key.
pub const MAX_HANDSHAKE_FRAME_LEN: usize = 64 * 1024;

/// Writes one frame and flushes the stream.
///
/// # Errors
///
/// - [`PeerChatError::ProtocolError`] if `payload` does not fit a `u32` length.
/// - [`PeerChatError::TransportError`] if the write fails.
pub async fn write_frame<W>(io: &mut W, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| PeerChatError::ProtocolError {
        reason: format!("frame of {} bytes exceeds u32 length prefix", payload.len()),
    })?;

    // Prefix and payload in a single write.
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(payload);

    io.write_all(&buf).await.map_err(transport_error)?;
    io.flush().await.map_err(transport_error)?;
    Ok(())
}

/// Reads one frame, rejecting payloads longer than `max_len`.
///
/// # Errors
///
/// - [`PeerChatError::TransportError`] if the stream closes or fails.
/// - [`PeerChatError::ProtocolError`] if the announced length exceeds `max_len`.
pub async fn read_frame<R>(io: &mut R, max_len: usize) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let len = io.read_u32().await.map_err(transport_error)? as usize;
    if len > max_len {
        return Err(PeerChatError::ProtocolError {
            reason: format!("frame of {len} bytes exceeds limit of {max_len}"),
        });
    }

    let mut payload = vec![0u8; len];
    io.read_exact(&mut payload).await.map_err(transport_error)?;
    Ok(payload)
}

fn transport_error(e: std::io::Error) -> PeerChatError {
    let reason = match e.kind() {
        ErrorKind::UnexpectedEof => "connection closed by peer".to_string(),
        _ => e.to_string(),
    };
    PeerChatError::TransportError { reason }
}
