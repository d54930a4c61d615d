//! Frame model and the pure encode/decode functions.
//!
//! Frame layout (fixed 128-byte header + body):
//!
//! ```text
//! +------------------------------------------+------------------------+
//! | header (ASCII key:value tokens + NULs)   | body                   |
//! | 128 bytes                                | fileSize bytes, or 4   |
//! |                                          | bytes for descriptors  |
//! +------------------------------------------+------------------------+
//! ```

use crate::error::ProtocolError;
use crate::header::{validate_name, FrameHeader, FrameKind, DESCRIPTOR_BODY_LEN, HEADER_WIDTH};
use bytes::{BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use std::fmt;

/// Server-assigned identity of a connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub u32);

impl PeerId {
    /// Largest identity handed out; the descriptor body is a signed 32-bit value.
    pub const MAX: PeerId = PeerId(i32::MAX as u32);

    /// Number of significant bits in the identity value.
    pub fn bit_length(&self) -> u32 {
        u32::BITS - self.0.leading_zeros()
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PeerId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse().map(PeerId)
    }
}

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Attachment file name; `None` for messages and descriptors.
    pub name: Option<String>,
    pub payload: Bytes,
    /// Size as stated in the header.
    pub declared_size: u64,
}

/// Result of attempting to decode one frame from the front of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeResult {
    /// More bytes are needed. Nothing was consumed.
    Incomplete,
    /// A full frame is present; `consumed` bytes belong to it.
    Decoded { frame: Frame, consumed: usize },
}

impl Frame {
    /// Builds a frame, deriving the declared size from the payload.
    pub fn new(
        kind: FrameKind,
        name: Option<String>,
        payload: Bytes,
    ) -> Result<Self, ProtocolError> {
        match kind {
            FrameKind::Message => Ok(Self::message_bytes(payload)),
            FrameKind::Attachment => {
                let name = name.ok_or(ProtocolError::MissingField("fileName"))?;
                Self::attachment(name, payload)
            }
            FrameKind::Descriptor => {
                let id = descriptor_from_payload(&payload)?;
                Ok(Self::descriptor(id))
            }
        }
    }

    /// Creates a text message frame.
    pub fn message(text: &str) -> Self {
        Self::message_bytes(Bytes::copy_from_slice(text.as_bytes()))
    }

    fn message_bytes(payload: Bytes) -> Self {
        Self {
            kind: FrameKind::Message,
            name: None,
            declared_size: payload.len() as u64,
            payload,
        }
    }

    /// Creates an attachment frame.
    pub fn attachment(name: impl Into<String>, payload: Bytes) -> Result<Self, ProtocolError> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            kind: FrameKind::Attachment,
            name: Some(name),
            declared_size: payload.len() as u64,
            payload,
        })
    }

    /// Creates a descriptor frame carrying an assigned identity.
    ///
    /// The declared size is the identity's bit-length, not the body length.
    pub fn descriptor(id: PeerId) -> Self {
        Self {
            kind: FrameKind::Descriptor,
            name: None,
            payload: Bytes::copy_from_slice(&id.0.to_be_bytes()),
            declared_size: id.bit_length() as u64,
        }
    }

    /// Returns the header describing this frame.
    pub fn header(&self) -> FrameHeader {
        FrameHeader::new(self.kind, self.name.clone(), self.declared_size)
    }

    /// Checks the declared size against the payload.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let expected = match self.kind {
            FrameKind::Descriptor => descriptor_from_payload(&self.payload)?.bit_length() as u64,
            FrameKind::Message | FrameKind::Attachment => self.payload.len() as u64,
        };
        if self.declared_size != expected {
            return Err(ProtocolError::SizeMismatch {
                declared: self.declared_size,
                expected,
            });
        }
        Ok(())
    }

    /// Returns the message text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }

    /// Returns the identity carried by a descriptor frame.
    pub fn descriptor_id(&self) -> Result<PeerId, ProtocolError> {
        descriptor_from_payload(&self.payload)
    }

    /// Total encoded length of this frame.
    pub fn encoded_len(&self) -> usize {
        HEADER_WIDTH + self.payload.len()
    }

    /// Encodes the frame into bytes.
    pub fn encode(&self) -> Result<BytesMut, ProtocolError> {
        self.validate()?;
        let header = self.header().encode()?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_slice(&header);
        buf.put_slice(&self.payload);
        Ok(buf)
    }

    /// Attempts to decode one frame from the front of `buf` without
    /// consuming anything.
    pub fn try_decode(buf: &[u8]) -> Result<DecodeResult, ProtocolError> {
        let (header, body_len) = match peek_header(buf)? {
            Some(parsed) => parsed,
            None => return Ok(DecodeResult::Incomplete),
        };

        // A size no buffer can hold is simply never complete
        let Some(total) = HEADER_WIDTH.checked_add(body_len) else {
            return Ok(DecodeResult::Incomplete);
        };
        if buf.len() < total {
            return Ok(DecodeResult::Incomplete);
        }

        let payload = Bytes::copy_from_slice(&buf[HEADER_WIDTH..total]);
        Ok(DecodeResult::Decoded {
            frame: Self::from_parts(header, payload),
            consumed: total,
        })
    }

    pub(crate) fn from_parts(header: FrameHeader, payload: Bytes) -> Self {
        Self {
            kind: header.kind,
            name: header.name,
            payload,
            declared_size: header.size,
        }
    }
}

/// Parses the header at the front of `buf`, if enough bytes are present.
///
/// Returns the header and the length of the body that follows it.
pub(crate) fn peek_header(buf: &[u8]) -> Result<Option<(FrameHeader, usize)>, ProtocolError> {
    let raw = match buf
        .get(..HEADER_WIDTH)
        .and_then(|slice| <&[u8; HEADER_WIDTH]>::try_from(slice).ok())
    {
        Some(raw) => raw,
        None => return Ok(None),
    };
    let header = FrameHeader::parse(raw)?;
    let body_len = header.body_len()?;
    Ok(Some((header, body_len)))
}

fn descriptor_from_payload(payload: &[u8]) -> Result<PeerId, ProtocolError> {
    let bytes: [u8; DESCRIPTOR_BODY_LEN] = payload
        .try_into()
        .map_err(|_| ProtocolError::InvalidDescriptor(payload.len()))?;
    Ok(PeerId(u32::from_be_bytes(bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn decode_one(buf: &[u8]) -> (Frame, usize) {
        match Frame::try_decode(buf).unwrap() {
            DecodeResult::Decoded { frame, consumed } => (frame, consumed),
            DecodeResult::Incomplete => panic!("expected a full frame"),
        }
    }

    #[test]
    fn test_message_scenario() {
        let frame = Frame::message("hello");
        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_WIDTH + 5);

        let (decoded, consumed) = decode_one(&encoded);
        assert_eq!(consumed, HEADER_WIDTH + 5);
        assert_eq!(decoded.kind, FrameKind::Message);
        assert_eq!(decoded.payload.as_ref(), b"hello");
        assert_eq!(decoded.declared_size, 5);
        assert_eq!(decoded.text(), "hello");
    }

    #[test]
    fn test_attachment_scenario() {
        let frame = Frame::attachment("a.txt", Bytes::from_static(b"0123456789")).unwrap();
        let encoded = frame.encode().unwrap();

        let header_text = b"fileType:attachment,fileName:a.txt,fileSize:10,";
        assert_eq!(&encoded[..header_text.len()], header_text);

        let (decoded, consumed) = decode_one(&encoded);
        assert_eq!(consumed, HEADER_WIDTH + 10);
        assert_eq!(decoded.kind, FrameKind::Attachment);
        assert_eq!(decoded.name.as_deref(), Some("a.txt"));
        assert_eq!(decoded.payload.len(), 10);
    }

    #[test]
    fn test_malformed_scenario() {
        let mut raw = vec![0u8; HEADER_WIDTH];
        let text = b"fileType:bogus,fileName:null,fileSize:0,";
        raw[..text.len()].copy_from_slice(text);

        let result = Frame::try_decode(&raw);
        assert!(matches!(result, Err(ProtocolError::UnknownKind(_))));
    }

    #[test]
    fn test_descriptor_quirk() {
        let frame = Frame::descriptor(PeerId(5));
        // 5 = 0b101 -> three bits
        assert_eq!(frame.declared_size, 3);
        assert_eq!(frame.payload.as_ref(), &[0, 0, 0, 5]);

        let encoded = frame.encode().unwrap();
        assert_eq!(encoded.len(), HEADER_WIDTH + DESCRIPTOR_BODY_LEN);

        let (decoded, consumed) = decode_one(&encoded);
        assert_eq!(consumed, HEADER_WIDTH + DESCRIPTOR_BODY_LEN);
        assert_eq!(decoded.descriptor_id().unwrap(), PeerId(5));
        assert!(decoded.validate().is_ok());
    }

    #[test]
    fn test_size_mismatch_reported() {
        let mut frame = Frame::message("abc");
        frame.declared_size = 7;
        assert!(matches!(
            frame.validate(),
            Err(ProtocolError::SizeMismatch {
                declared: 7,
                expected: 3
            })
        ));
        // Encoding a mismatched frame would break framing for the peer
        assert!(frame.encode().is_err());
    }

    #[test]
    fn test_descriptor_mismatch_still_decodes() {
        let mut raw = vec![0u8; HEADER_WIDTH];
        let text = b"fileType:descriptor,fileName:null,fileSize:32,";
        raw[..text.len()].copy_from_slice(text);
        raw.extend_from_slice(&7u32.to_be_bytes());

        let (decoded, _) = decode_one(&raw);
        assert_eq!(decoded.descriptor_id().unwrap(), PeerId(7));
        // 7 = 0b111 -> three bits, whatever the body width
        assert!(matches!(
            decoded.validate(),
            Err(ProtocolError::SizeMismatch {
                declared: 32,
                expected: 3
            })
        ));
    }

    #[test]
    fn test_incomplete_header() {
        let encoded = Frame::message("hi").encode().unwrap();
        let result = Frame::try_decode(&encoded[..HEADER_WIDTH - 1]).unwrap();
        assert_eq!(result, DecodeResult::Incomplete);
    }

    #[test]
    fn test_incomplete_body() {
        let encoded = Frame::message("hello world").encode().unwrap();
        let result = Frame::try_decode(&encoded[..HEADER_WIDTH + 3]).unwrap();
        assert_eq!(result, DecodeResult::Incomplete);
    }

    #[test]
    fn test_unbounded_declared_size_is_incomplete() {
        let mut raw = vec![0u8; HEADER_WIDTH];
        let text = format!("fileType:message,fileName:null,fileSize:{},", u64::MAX);
        raw[..text.len()].copy_from_slice(text.as_bytes());
        raw.extend_from_slice(b"some trailing body bytes");

        let result = Frame::try_decode(&raw).unwrap();
        assert_eq!(result, DecodeResult::Incomplete);
    }

    #[test]
    fn test_empty_message() {
        let encoded = Frame::message("").encode().unwrap();
        assert_eq!(encoded.len(), HEADER_WIDTH);

        let (decoded, consumed) = decode_one(&encoded);
        assert_eq!(consumed, HEADER_WIDTH);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_two_frames_in_buffer() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&Frame::message("one").encode().unwrap());
        buf.extend_from_slice(&Frame::message("two").encode().unwrap());

        let (first, consumed) = decode_one(&buf);
        assert_eq!(first.text(), "one");

        let (second, _) = decode_one(&buf[consumed..]);
        assert_eq!(second.text(), "two");
    }

    #[test]
    fn test_new_dispatches_by_kind() {
        let frame = Frame::new(FrameKind::Message, None, Bytes::from_static(b"x")).unwrap();
        assert_eq!(frame, Frame::message("x"));

        let result = Frame::new(FrameKind::Attachment, None, Bytes::new());
        assert!(matches!(result, Err(ProtocolError::MissingField("fileName"))));

        let result = Frame::new(FrameKind::Descriptor, None, Bytes::from_static(b"12"));
        assert!(matches!(result, Err(ProtocolError::InvalidDescriptor(2))));
    }

    #[test]
    fn test_lossy_text() {
        let frame = Frame::new(
            FrameKind::Message,
            None,
            Bytes::from_static(&[b'o', b'k', 0xFF]),
        )
        .unwrap();
        assert!(frame.text().starts_with("ok"));
    }

    #[test]
    fn test_peer_id() {
        assert_eq!(PeerId(0).bit_length(), 0);
        assert_eq!(PeerId(1).bit_length(), 1);
        assert_eq!(PeerId(255).bit_length(), 8);
        assert_eq!("42".parse::<PeerId>().unwrap(), PeerId(42));
        assert!("abc".parse::<PeerId>().is_err());
    }

    fn arb_frame() -> impl Strategy<Value = Frame> {
        let message = proptest::collection::vec(any::<u8>(), 0..2048)
            .prop_map(|p| Frame::new(FrameKind::Message, None, Bytes::from(p)).unwrap());
        let attachment = (
            "[a-zA-Z0-9_.-]{1,40}",
            proptest::collection::vec(any::<u8>(), 0..2048),
        )
            .prop_filter("null is reserved", |(name, _)| name != "null")
            .prop_map(|(name, p)| Frame::attachment(name, Bytes::from(p)).unwrap());
        let descriptor = any::<u32>().prop_map(|id| Frame::descriptor(PeerId(id)));
        prop_oneof![message, attachment, descriptor]
    }

    proptest! {
        #[test]
        fn prop_roundtrip(frame in arb_frame()) {
            let encoded = frame.encode().unwrap();
            let (decoded, consumed) = decode_one(&encoded);
            prop_assert_eq!(consumed, HEADER_WIDTH + frame.payload.len());
            prop_assert_eq!(decoded, frame);
        }

        #[test]
        fn prop_prefix_is_incomplete(frame in arb_frame(), cut in any::<prop::sample::Index>()) {
            let encoded = frame.encode().unwrap();
            let cut = cut.index(encoded.len());
            prop_assert_eq!(Frame::try_decode(&encoded[..cut]).unwrap(), DecodeResult::Incomplete);
        }
    }
}
