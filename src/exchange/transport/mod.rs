//! Notification channels.
//!
//! [`MemoryHub`] routes notifications between users of one process.
//! [`TcpNotifier`] and [`TcpInbox`] carry them over a TCP stream as
//! length-prefixed JSON frames.

mod memory;
mod tcp;

pub use memory::{MemoryHub, MemoryInbox};
pub use tcp::{TcpInbox, TcpNotificationListener, TcpNotifier};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::ExchangeError;

/// Largest frame accepted on the wire.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Writes `data` prefixed with its length as a little-endian u32.
pub async fn write_length_prefixed<W: AsyncWrite + Unpin>(
    writer: &mut W,
    data: &[u8],
) -> Result<(), ExchangeError> {
    if data.len() > MAX_FRAME_LEN {
        return Err(ExchangeError::TransportFailure(format!(
            "Frame too large: {} bytes",
            data.len()
        )));
    }
    let len = data.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(data).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads one length-prefixed frame.
///
/// Returns `None` on a clean end of stream before the length prefix.
pub async fn read_length_prefixed<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<u8>>, ExchangeError> {
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_le_bytes(len_bytes) as usize;

    if len > MAX_FRAME_LEN {
        return Err(ExchangeError::TransportFailure(format!(
            "Frame too large: {} bytes",
            len
        )));
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    Ok(Some(data))
}
