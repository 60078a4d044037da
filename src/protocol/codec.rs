//! Frame codec for the StrataDB driver protocol.
//!
//! Every connection starts with a fixed magic preamble, then exchanges
//! length-prefixed MessagePack frames: a 4-byte big-endian payload length
//! followed by the payload itself.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DriverError, DriverResult};

pub const DRIVER_MAGIC: &[u8] = b"stratadb-drv-v1\0";
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

pub fn encode_frame<T: Serialize>(msg: &T) -> DriverResult<Vec<u8>> {
    let payload = rmp_serde::to_vec_named(msg)
        .map_err(|e| DriverError::Protocol(format!("Serialization failed: {}", e)))?;

    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(DriverError::MessageTooLarge);
    }

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

pub fn decode_frame<T: for<'de> Deserialize<'de>>(data: &[u8]) -> DriverResult<T> {
    rmp_serde::from_slice(data)
        .map_err(|e| DriverError::Protocol(format!("Deserialization failed: {}", e)))
}

/// Write half of a framed connection. Single owner; writes are never
/// interleaved because all frames for one connection go through one writer.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn write_frame<T: Serialize>(&mut self, msg: &T) -> DriverResult<()> {
        let data = encode_frame(msg)?;
        self.inner
            .write_all(&data)
            .await
            .map_err(|e| DriverError::Transport(format!("Write failed: {}", e)))?;
        self.inner
            .flush()
            .await
            .map_err(|e| DriverError::Transport(format!("Flush failed: {}", e)))?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> DriverResult<()> {
        self.inner
            .shutdown()
            .await
            .map_err(|e| DriverError::Transport(format!("Shutdown failed: {}", e)))
    }
}

/// Read half of a framed connection.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next frame. Returns `Ok(None)` on a clean end-of-stream at
    /// a frame boundary; EOF in the middle of a frame is a transport fault.
    pub async fn read_frame<T: for<'de> Deserialize<'de>>(&mut self) -> DriverResult<Option<T>> {
        let mut len_buf = [0u8; 4];
        match self.inner.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(DriverError::Transport(format!("Read length failed: {}", e))),
        }

        let msg_len = u32::from_be_bytes(len_buf) as usize;
        if msg_len > MAX_MESSAGE_SIZE {
            return Err(DriverError::MessageTooLarge);
        }

        let mut payload = vec![0u8; msg_len];
        self.inner
            .read_exact(&mut payload)
            .await
            .map_err(|e| DriverError::Transport(format!("Read payload failed: {}", e)))?;

        decode_frame(&payload).map(Some)
    }
}

/// Writes the magic preamble that opens every driver connection.
pub async fn write_magic<W: AsyncWrite + Unpin>(writer: &mut W) -> DriverResult<()> {
    writer
        .write_all(DRIVER_MAGIC)
        .await
        .map_err(|e| DriverError::Transport(format!("Failed to send magic header: {}", e)))
}
