use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufStream};

use crate::codec::Codec;
use crate::error::{Error, Result};
use crate::stream::{BoxStream, Stream};

/// Largest accepted frame (100MB)
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// Buffered, length-prefixed message framing over one stream
///
/// Frames are a 4-byte big-endian length prefix followed by the codec
/// payload. Writes land in a buffer and only reach the peer on
/// [`flush`](Self::flush), so one logical message can span several frames.
pub struct FramedStream<C> {
    stream: BufStream<BoxStream>,
    codec: C,
}

impl<C: Codec> FramedStream<C> {
    pub fn new(stream: BoxStream, codec: C) -> Self {
        Self {
            stream: BufStream::new(stream),
            codec,
        }
    }

    /// Encode a value as one frame into the write buffer
    pub async fn encode<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<()> {
        let bytes = self.codec.encode(value)?;
        self.write_frame(&bytes).await
    }

    /// Decode the next frame into a value
    pub async fn decode<T: DeserializeOwned>(&mut self) -> Result<T> {
        let bytes = self.read_frame().await?;
        self.codec.decode(&bytes)
    }

    /// Write an already encoded payload as one frame
    pub async fn write_frame(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > MAX_FRAME_LEN {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                bytes.len()
            )));
        }
        self.stream.write_u32(bytes.len() as u32).await?;
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Read the payload of the next frame
    ///
    /// End-of-stream before the first byte of a frame is
    /// [`Error::ConnectionClosed`]; end-of-stream inside a frame is an IO
    /// error.
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        if self.stream.fill_buf().await?.is_empty() {
            return Err(Error::ConnectionClosed);
        }

        let len = self.stream.read_u32().await? as usize;
        if len > MAX_FRAME_LEN {
            return Err(Error::InvalidFrame(format!(
                "Message too large: {} bytes",
                len
            )));
        }

        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Push buffered frames to the peer
    pub async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }

    /// Flush and shut the stream down gracefully
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    /// Abort the stream without flushing
    pub fn reset(mut self) {
        self.stream.get_mut().reset();
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }
}
