//! Length-prefixed message framing.
//!
//! Each message is a 4-byte big-endian length followed by that many bytes of
//! JSON. Readers may receive partial chunks; [`read_frame`] buffers until a
//! complete frame is available.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum accepted frame length (4 MiB). A larger header is a protocol
/// error and terminates the connection.
pub const MAX_FRAME_LEN: u32 = 4 * 1024 * 1024;

/// Encode a payload into a framed byte buffer.
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut bytes = Vec::with_capacity(4 + payload.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(payload);
    bytes
}

/// Decode the length prefix from a 4-byte header.
pub fn decode_len(header: &[u8; 4]) -> u32 {
    u32::from_be_bytes(*header)
}

/// Read one complete frame, or `None` on clean EOF at a frame boundary.
///
/// EOF in the middle of a frame, or a length header above [`MAX_FRAME_LEN`],
/// is an error: the connection is in an unrecoverable state and must be
/// closed.
pub async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    // Peek the first byte so EOF at a frame boundary is distinguishable
    // from EOF mid-header.
    match reader.read(&mut header[..1]).await? {
        0 => return Ok(None),
        _ => reader.read_exact(&mut header[1..]).await.map(|_| ())?,
    }

    let len = decode_len(&header);
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("frame length {len} exceeds maximum {MAX_FRAME_LEN}"),
        ));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one framed payload and flush.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() as u64 > MAX_FRAME_LEN as u64 {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "payload exceeds maximum frame length",
        ));
    }
    writer.write_all(&encode_frame(payload)).await?;
    writer.flush().await
}
