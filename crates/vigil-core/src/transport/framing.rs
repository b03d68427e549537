//! Length-prefixed framing shared by every Vigil socket.
//!
//! ```text
//! [u32 LE: len][UTF-8 payload bytes of len]
//! ```

use crate::config::SocketConfig;
use crate::error::{Result, VigilError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Size of the length header in bytes.
pub const HEADER_SIZE: usize = 4;

/// Read a length-prefixed frame from an async reader.
///
/// Returns `None` on clean EOF before any header byte (peer closed the
/// connection). EOF in the middle of the header or payload is an error; short
/// reads are accumulated until the declared length is reached.
pub async fn read_frame<R: AsyncReadExt + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; HEADER_SIZE];
    let first = reader.read(&mut len_buf).await?;
    if first == 0 {
        return Ok(None);
    }
    if first < HEADER_SIZE {
        reader.read_exact(&mut len_buf[first..]).await?;
    }

    let len = u32::from_le_bytes(len_buf) as usize;

    if len > SocketConfig::MAX_MESSAGE_SIZE {
        return Err(VigilError::Validation {
            field: "frame".to_string(),
            message: format!(
                "Message size {} exceeds maximum {}",
                len,
                SocketConfig::MAX_MESSAGE_SIZE
            ),
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    Ok(Some(payload))
}

/// Write a length-prefixed frame to an async writer.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > SocketConfig::MAX_MESSAGE_SIZE {
        return Err(VigilError::Validation {
            field: "frame".to_string(),
            message: format!(
                "Message size {} exceeds maximum {}",
                payload.len(),
                SocketConfig::MAX_MESSAGE_SIZE
            ),
        });
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
