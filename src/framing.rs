//! Length-prefixed framing for the signaling transport.
//!
//! Each frame is a 4-byte big-endian length followed by one JSON
//! [`Envelope`]:
//!
//! ```text
//! ┌──────────────────┬───────────────────────────┐
//! │ Length (4 bytes) │ Envelope JSON (N bytes)   │
//! │  big-endian u32  │                           │
//! └──────────────────┴───────────────────────────┘
//! ```

use crate::protocol::Envelope;
use anyhow::{anyhow, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (64 KB). Signaling payloads are small; anything
/// larger is a protocol violation.
pub const MAX_FRAME_SIZE: u32 = 64 * 1024;

/// Read one framed envelope from the stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Envelope>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);

    if len == 0 {
        return Err(anyhow!("empty frame"));
    }
    if len > MAX_FRAME_SIZE {
        return Err(anyhow!(
            "frame too large: {} bytes (max {})",
            len,
            MAX_FRAME_SIZE
        ));
    }

    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf).await?;
    Ok(serde_json::from_slice(&buf)?)
}

/// Write one framed envelope to the stream and flush it.
pub async fn write_frame<W>(writer: &mut W, envelope: &Envelope) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_vec(envelope)?;
    if json.len() > MAX_FRAME_SIZE as usize {
        return Err(anyhow!(
            "frame too large: {} bytes (max {})",
            json.len(),
            MAX_FRAME_SIZE
        ));
    }

    let len = json.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_roundtrip() {
        let envelope = Envelope {
            opcode: 7,
            data: serde_json::json!({"id": "127.0.0.0", "alias": "127.0.0.0:0"}),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &envelope).await.unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frame(&mut cursor).await.unwrap();
        assert_eq!(decoded.opcode, envelope.opcode);
        assert_eq!(decoded.data, envelope.data);
    }

    #[tokio::test]
    async fn test_length_prefix_matches_body() {
        let envelope = Envelope {
            opcode: 1,
            data: serde_json::json!({"subnet": "127.0.0"}),
        };

        let mut buf = Vec::new();
        write_frame(&mut buf, &envelope).await.unwrap();

        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        assert_eq!(len as usize, buf.len() - 4);

        let json = std::str::from_utf8(&buf[4..]).unwrap();
        assert!(json.contains("\"opcode\":1"));
    }

    #[tokio::test]
    async fn test_rejects_oversized_frame() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(MAX_FRAME_SIZE + 1).to_be_bytes());
        buf.extend_from_slice(&[0u8; 16]);

        let mut cursor = Cursor::new(buf);
        let err = read_frame(&mut cursor).await.expect_err("oversized frame");
        assert!(err.to_string().contains("frame too large"));
    }

    #[tokio::test]
    async fn test_rejects_empty_frame() {
        let mut cursor = Cursor::new(0u32.to_be_bytes().to_vec());
        let err = read_frame(&mut cursor).await.expect_err("empty frame");
        assert!(err.to_string().contains("empty frame"));
    }
}
