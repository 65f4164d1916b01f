//! Length-prefixed JSON framing.
//!
//! Every message on every socket - client requests, responses, and peer
//! consensus traffic - is one frame: a `u32` little-endian payload length
//! followed by that many bytes of JSON. Frames larger than the configured
//! bound are rejected before allocation.

use crate::core::error::{NotaryError, NotaryResult};
use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Encode `value` as one frame.
pub fn encode_frame<T: Serialize>(value: &T, max_frame: usize) -> NotaryResult<Bytes> {
    let payload = serde_json::to_vec(value)
        .map_err(|e| NotaryError::internal(format!("encode frame: {e}")))?;
    if payload.len() > max_frame {
        return Err(NotaryError::network(format!(
            "outbound frame of {} bytes exceeds limit of {max_frame}",
            payload.len()
        )));
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Write `value` as one frame and flush.
pub async fn write_frame<W, T>(writer: &mut W, value: &T, max_frame: usize) -> NotaryResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode_frame(value, max_frame)?;
    writer
        .write_all(&frame)
        .await
        .map_err(NotaryError::network)?;
    writer.flush().await.map_err(NotaryError::network)?;
    Ok(())
}

/// Read one frame, decoding its payload.
///
/// Returns `Ok(None)` when the peer closed the connection cleanly before a
/// frame started; mid-frame EOF is an error.
pub async fn read_frame<R, T>(reader: &mut R, max_frame: usize) -> NotaryResult<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(NotaryError::network(e)),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max_frame {
        return Err(NotaryError::network(format!(
            "inbound frame of {len} bytes exceeds limit of {max_frame}"
        )));
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(NotaryError::network)?;
    serde_json::from_slice(&payload)
        .map_err(|e| NotaryError::malformed(format!("undecodable frame: {e}")))
        .map(Some)
}
