// Length-prefixed framing: [u32 big-endian length][payload]

use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest accepted request payload (1 MiB)
pub const MAX_FRAME_LEN: u32 = 1 << 20;

/// Why a frame could not be read
#[derive(Debug, Error)]
pub enum FrameError {
    /// Declared length of zero
    #[error("empty frame")]
    Empty,

    /// Declared length over the cap; the payload is never read
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    TooLarge { len: u32, max: u32 },

    /// Short read, peer closed, or transport failure
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Protocol violations are answered with `ERR`; transport errors are not
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Empty | Self::TooLarge { .. })
    }
}

/// Read one frame, rejecting empty frames and frames longer than `max_len`
pub async fn read_frame<R>(reader: &mut R, max_len: u32) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await?;

    if len == 0 {
        return Err(FrameError::Empty);
    }
    if len > max_len {
        return Err(FrameError::TooLarge { len, max: max_len });
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one frame and flush it
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(payload.len()).map_err(|_| {
        io::Error::new(io::ErrorKind::InvalidInput, "payload too large to frame")
    })?;

    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"OK\n").await.unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, b'O', b'K', b'\n']);

        let payload = read_frame(&mut buf.as_slice(), MAX_FRAME_LEN).await.unwrap();
        assert_eq!(payload, b"OK\n");
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized() {
        let empty = [0u8, 0, 0, 0];
        let err = read_frame(&mut &empty[..], MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::Empty));
        assert!(err.is_protocol_violation());

        let huge = (MAX_FRAME_LEN + 1).to_be_bytes();
        let err = read_frame(&mut &huge[..], MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { len, .. } if len == MAX_FRAME_LEN + 1));
    }

    #[tokio::test]
    async fn test_accepts_frame_at_cap() {
        let mut buf = Vec::new();
        let payload = vec![b'x'; MAX_FRAME_LEN as usize];
        write_frame(&mut buf, &payload).await.unwrap();

        let read = read_frame(&mut buf.as_slice(), MAX_FRAME_LEN).await.unwrap();
        assert_eq!(read.len(), MAX_FRAME_LEN as usize);
    }

    #[tokio::test]
    async fn test_short_reads_are_transport_errors() {
        let truncated_len = [0u8, 0];
        let err = read_frame(&mut &truncated_len[..], MAX_FRAME_LEN).await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));

        let truncated_payload = [0u8, 0, 0, 5, b'a', b'b'];
        let err = read_frame(&mut &truncated_payload[..], MAX_FRAME_LEN).await.unwrap_err();
        assert!(!err.is_protocol_violation());
    }
}
