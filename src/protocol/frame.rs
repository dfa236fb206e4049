//! Length-prefixed framing over async byte streams.
//!
//! A frame is a 4-byte unsigned big-endian length followed by exactly that
//! many payload bytes. The reader never yields a partial payload.
//!
//! No maximum length is enforced unless the caller passes one. A hostile
//! prefix can otherwise request an arbitrarily large buffer.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Peer closed the stream before a complete frame arrived.
    #[error("connection closed")]
    ConnectionClosed,

    /// Declared payload length exceeds the configured cap.
    #[error("frame length {length} exceeds maximum {limit}")]
    FrameTooLarge { length: usize, limit: usize },

    /// Payload does not fit in a 4-byte prefix.
    #[error("payload of {0} bytes cannot be framed")]
    PayloadTooLarge(usize),

    /// Underlying socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Prefix `payload` with its big-endian length.
pub fn encode(payload: &[u8]) -> Result<Bytes, FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
    frame.put_u32(len);
    frame.extend_from_slice(payload);
    Ok(frame.freeze())
}

/// Read exactly one frame and return its payload.
///
/// Suspends until the 4 length bytes and then the full payload are
/// available. End of stream at any point yields
/// [`FrameError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R, max_len: Option<usize>) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; FRAME_HEADER_SIZE];
    read_exact_or_closed(reader, &mut prefix).await?;
    let length = u32::from_be_bytes(prefix) as usize;

    if let Some(limit) = max_len {
        if length > limit {
            return Err(FrameError::FrameTooLarge { length, limit });
        }
    }

    let mut payload = BytesMut::zeroed(length);
    read_exact_or_closed(reader, &mut payload).await?;
    Ok(payload.freeze())
}

/// Frame `payload` and write it out, flushing afterwards.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode(payload)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::ConnectionClosed),
        Err(e) => Err(FrameError::Io(e)),
    }
}
