//! Frame header encoding/decoding
//!
//! Every frame is a 4-byte header followed by an opaque payload:
//! - payload_length: 4 bytes (u32, big-endian, max 16MB)
//!
//! The framing layer never interprets payload contents. Post-handshake
//! network payloads are sealed before framing, so nothing but the length
//! is visible on the wire.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 4;

/// Maximum payload size (16MB - 1)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Frame header carrying the payload length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(payload_length: u32) -> Self {
        Self { payload_length }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u32(self.payload_length);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the declared length exceeds the payload cap.
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the length before consuming so a bad frame leaves the
        // buffer untouched for the caller to inspect.
        let payload_length = u32::from_be_bytes([src[0], src[1], src[2], src[3]]);
        if payload_length as usize > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_length as usize,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        src.advance(HEADER_SIZE);
        Ok(Some(Self { payload_length }))
    }
}
