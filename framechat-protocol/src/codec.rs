//! Buffered decoder and frame encoder.

use crate::error::ProtocolError;
use crate::frame::{peek_header, Frame, PeerId};
use crate::header::HEADER_WIDTH;
use bytes::{Buf, Bytes, BytesMut};

/// Encodes outbound payloads into wire frames.
pub struct Encoder;

impl Encoder {
    /// Encodes a chat message.
    pub fn encode_message(text: &str) -> Result<BytesMut, ProtocolError> {
        Frame::message(text).encode()
    }

    /// Encodes a named attachment.
    pub fn encode_attachment(name: &str, payload: Bytes) -> Result<BytesMut, ProtocolError> {
        Frame::attachment(name, payload)?.encode()
    }

    /// Encodes an identity descriptor.
    pub fn encode_descriptor(id: PeerId) -> Result<BytesMut, ProtocolError> {
        Frame::descriptor(id).encode()
    }
}

/// Accumulates inbound bytes and yields complete frames.
pub struct Decoder {
    buffer: BytesMut,
    max_payload: Option<u64>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            max_payload: None,
        }
    }

    /// Refuses frames whose body exceeds `max` bytes.
    pub fn with_max_payload(mut self, max: u64) -> Self {
        self.max_payload = Some(max);
        self
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next frame from the buffer.
    ///
    /// Returns `Ok(None)` when more data is needed; the buffer is left
    /// untouched in that case.
    pub fn decode_frame(&mut self) -> Result<Option<Frame>, ProtocolError> {
        let (header, body_len) = match peek_header(&self.buffer)? {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        if let Some(max) = self.max_payload {
            if body_len as u64 > max {
                return Err(ProtocolError::FrameTooLarge {
                    size: body_len as u64,
                    max,
                });
            }
        }

        let total = HEADER_WIDTH
            .checked_add(body_len)
            .ok_or(ProtocolError::FrameTooLarge {
                size: body_len as u64,
                max: (usize::MAX - HEADER_WIDTH) as u64,
            })?;
        if self.buffer.len() < total {
            return Ok(None);
        }

        self.buffer.advance(HEADER_WIDTH);
        let payload = self.buffer.split_to(body_len).freeze();
        Ok(Some(Frame::from_parts(header, payload)))
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}
