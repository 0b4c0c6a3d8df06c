//! Length-prefixed transport framing
//!
//! Each message travels as a 4-byte big-endian length followed by that many
//! message bytes. Outbound buffers reserve the header up front and the codec
//! fills it in when the buffer is sealed for sending.

use crate::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum frame size (16MB)
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Number of header bytes reserved at the front of every outbound buffer
pub const HEADER_LEN: usize = 4;

/// Frame codec for reading and writing messages over async streams
pub struct FrameCodec {
    /// Read buffer for incoming data
    read_buf: BytesMut,
    /// Maximum message size allowed
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Create a new frame codec with default settings
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    /// Create a new frame codec with custom max frame size
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            read_buf: BytesMut::with_capacity(8192),
            max_frame_size,
        }
    }

    /// Maximum message size this codec accepts
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Fill the reserved header of an outbound buffer
    ///
    /// `buf` holds [`HEADER_LEN`] placeholder bytes followed by the message.
    /// The returned bytes are ready to be written to the transport.
    pub fn seal(&self, buf: &[u8]) -> Result<Bytes, ProtocolError> {
        if buf.len() < HEADER_LEN {
            return Err(ProtocolError::MissingHeader(buf.len()));
        }
        let body_len = buf.len() - HEADER_LEN;
        if body_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: body_len,
                max: self.max_frame_size,
            });
        }

        let mut sealed = BytesMut::with_capacity(buf.len());
        sealed.put_u32(body_len as u32);
        sealed.put_slice(&buf[HEADER_LEN..]);
        Ok(sealed.freeze())
    }

    /// Write a sealed frame to an async writer
    pub async fn write_frame<W>(&self, writer: &mut W, sealed: &[u8]) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(sealed).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Read one message from an async reader
    ///
    /// Returns `Ok(None)` on a clean end of stream between frames.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Option<Bytes>, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(message) = self.try_decode_frame()? {
                return Ok(Some(message));
            }

            let n = reader.read_buf(&mut self.read_buf).await?;
            if n == 0 {
                if self.read_buf.is_empty() {
                    return Ok(None);
                }
                return Err(ProtocolError::TruncatedFrame(self.read_buf.len()));
            }
        }
    }

    /// Try to decode a message from the internal buffer
    pub fn try_decode_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        if self.read_buf.len() < HEADER_LEN {
            return Ok(None);
        }

        let frame_len = (&self.read_buf[..HEADER_LEN]).get_u32() as usize;
        if frame_len > self.max_frame_size {
            return Err(ProtocolError::FrameTooLarge {
                size: frame_len,
                max: self.max_frame_size,
            });
        }

        if self.read_buf.len() < HEADER_LEN + frame_len {
            self.read_buf.reserve(HEADER_LEN + frame_len - self.read_buf.len());
            return Ok(None);
        }

        self.read_buf.advance(HEADER_LEN);
        Ok(Some(self.read_buf.split_to(frame_len).freeze()))
    }
}
