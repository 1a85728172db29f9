//! Tokio codecs for framed protocol messages
//!
//! `FrameCodec` moves opaque length-prefixed payloads; `MessageCodec<M>`
//! layers bincode on top for endpoints that exchange typed messages in the
//! clear (the session channel and the worker's stdio loop). Network
//! connections use `FrameCodec` directly because post-handshake payloads
//! are sealed before framing.

use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};

/// Codec for opaque length-prefixed frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Try to decode a header if we don't have one
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None), // Need more data
            },
        };

        let payload_len = header.payload_length as usize;
        if src.len() < payload_len {
            // Save header and wait for more data
            self.pending_header = Some(header);
            return Ok(None);
        }

        Ok(Some(src.split_to(payload_len).freeze()))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        FrameHeader::new(payload.len() as u32).encode(dst);
        dst.extend_from_slice(&payload);
        Ok(())
    }
}

/// Typed codec: length-prefixed frames carrying bincode-encoded messages
#[derive(Debug, Default)]
pub struct MessageCodec<M> {
    inner: FrameCodec,
    _marker: PhantomData<M>,
}

impl<M> MessageCodec<M> {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            inner: FrameCodec::new(),
            _marker: PhantomData,
        }
    }
}

impl<M: DeserializeOwned> Decoder for MessageCodec<M> {
    type Item = M;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.inner.decode(src)? {
            Some(payload) => Ok(Some(bincode::deserialize(&payload)?)),
            None => Ok(None),
        }
    }
}

impl<M: Serialize> Encoder<M> for MessageCodec<M> {
    type Error = ProtocolError;

    fn encode(&mut self, message: M, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = bincode::serialize(&message)?;
        self.inner.encode(Bytes::from(payload), dst)
    }
}
