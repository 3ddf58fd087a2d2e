//! Length-prefixed framing.
//!
//! Wire format: `[4-byte BE length][payload]`. A frame is only yielded once
//! all `length` payload bytes have arrived; partial input stays buffered.
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::TransportError;

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Encoder/decoder for length-prefixed frames.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl FrameCodec {
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Encode one payload into a complete frame.
    pub fn encode(&self, payload: &[u8]) -> Result<Bytes, TransportError> {
        if payload.len() > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_size,
            });
        }
        let mut out = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
        out.put_u32(payload.len() as u32);
        out.put_slice(payload);
        Ok(out.freeze())
    }

    /// Pop the next complete frame payload from `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds less than one full frame; the
    /// bytes are left in place for the next call.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Bytes>, TransportError> {
        if buf.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut len_buf = [0u8; FRAME_HEADER_LEN];
        len_buf.copy_from_slice(&buf[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > self.max_frame_size {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }

        if buf.len() < FRAME_HEADER_LEN + len {
            buf.reserve(FRAME_HEADER_LEN + len - buf.len());
            return Ok(None);
        }

        buf.advance(FRAME_HEADER_LEN);
        Ok(Some(buf.split_to(len).freeze()))
    }
}
