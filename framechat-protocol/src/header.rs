//! Fixed-width textual frame header.
//!
//! Every frame starts with a header of exactly [`HEADER_WIDTH`] bytes:
//!
//! ```text
//! fileType:<message|attachment|descriptor>,fileName:<name|null>,fileSize:<n>[;],\0\0\0...
//! ```
//!
//! The header text is a list of comma-separated `key:value` tokens followed by
//! NUL filler up to the fixed width. The layout is kept byte-compatible with
//! existing peers; parsing validates each token instead of splitting blindly.

use crate::error::ProtocolError;
use std::fmt;

/// Width of the fixed frame header in bytes.
pub const HEADER_WIDTH: usize = 128;

/// Token written in place of an absent file name.
pub const NULL_NAME: &str = "null";

/// Size of a descriptor frame body (a 32-bit identity).
pub const DESCRIPTOR_BODY_LEN: usize = 4;

const KEY_TYPE: &str = "fileType";
const KEY_NAME: &str = "fileName";
const KEY_SIZE: &str = "fileSize";

/// Kind of payload carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// UTF-8 chat text.
    Message,
    /// Raw file bytes with a file name.
    Attachment,
    /// Server-assigned peer identity.
    Descriptor,
}

impl FrameKind {
    /// Returns the on-wire tag.
    pub fn tag(&self) -> &'static str {
        match self {
            FrameKind::Message => "message",
            FrameKind::Attachment => "attachment",
            FrameKind::Descriptor => "descriptor",
        }
    }

    /// Parses an on-wire tag.
    pub fn from_tag(tag: &str) -> Result<Self, ProtocolError> {
        match tag {
            "message" => Ok(FrameKind::Message),
            "attachment" => Ok(FrameKind::Attachment),
            "descriptor" => Ok(FrameKind::Descriptor),
            other => Err(ProtocolError::UnknownKind(other.to_string())),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Parsed frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub kind: FrameKind,
    pub name: Option<String>,
    /// Size as declared on the wire (`fileSize`).
    pub size: u64,
}

impl FrameHeader {
    pub fn new(kind: FrameKind, name: Option<String>, size: u64) -> Self {
        Self { kind, name, size }
    }

    /// Number of body bytes that follow this header.
    ///
    /// Descriptor bodies are always [`DESCRIPTOR_BODY_LEN`] bytes; their
    /// declared size carries the bit-length of the identity instead.
    pub fn body_len(&self) -> Result<usize, ProtocolError> {
        match self.kind {
            FrameKind::Descriptor => Ok(DESCRIPTOR_BODY_LEN),
            FrameKind::Message | FrameKind::Attachment => {
                usize::try_from(self.size).map_err(|_| ProtocolError::FrameTooLarge {
                    size: self.size,
                    max: usize::MAX as u64,
                })
            }
        }
    }

    /// Encodes the header into its fixed-width form.
    pub fn encode(&self) -> Result<[u8; HEADER_WIDTH], ProtocolError> {
        if let Some(ref name) = self.name {
            validate_name(name)?;
        }

        let text = format!(
            "{}:{},{}:{},{}:{},",
            KEY_TYPE,
            self.kind.tag(),
            KEY_NAME,
            self.name.as_deref().unwrap_or(NULL_NAME),
            KEY_SIZE,
            self.size
        );
        if text.len() > HEADER_WIDTH {
            return Err(ProtocolError::HeaderTooLong {
                len: text.len(),
                width: HEADER_WIDTH,
            });
        }

        let mut out = [0u8; HEADER_WIDTH];
        out[..text.len()].copy_from_slice(text.as_bytes());
        Ok(out)
    }

    /// Parses a fixed-width header.
    pub fn parse(raw: &[u8; HEADER_WIDTH]) -> Result<Self, ProtocolError> {
        // Filler starts at the first NUL.
        let end = raw.iter().position(|&b| b == 0).unwrap_or(HEADER_WIDTH);
        let text = std::str::from_utf8(&raw[..end]).map_err(|_| ProtocolError::InvalidUtf8)?;
        let text = text.trim_end();

        let mut kind: Option<&str> = None;
        let mut name: Option<&str> = None;
        let mut size: Option<&str> = None;

        for token in text.split(',').filter(|t| !t.is_empty()) {
            let (key, value) = token
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedToken(token.to_string()))?;
            let slot = match key {
                KEY_TYPE => (&mut kind, KEY_TYPE),
                KEY_NAME => (&mut name, KEY_NAME),
                KEY_SIZE => (&mut size, KEY_SIZE),
                other => return Err(ProtocolError::UnknownField(other.to_string())),
            };
            if slot.0.replace(value).is_some() {
                return Err(ProtocolError::DuplicateField(slot.1));
            }
        }

        let kind = FrameKind::from_tag(kind.ok_or(ProtocolError::MissingField(KEY_TYPE))?)?;
        let name = name.ok_or(ProtocolError::MissingField(KEY_NAME))?;
        let size = parse_size(size.ok_or(ProtocolError::MissingField(KEY_SIZE))?)?;

        let name = match name {
            "" | NULL_NAME => None,
            other => Some(other.to_string()),
        };
        if kind == FrameKind::Attachment && name.is_none() {
            return Err(ProtocolError::MissingField(KEY_NAME));
        }

        Ok(Self { kind, name, size })
    }
}

/// Parses a `fileSize` value, stripping an optional trailing `;`.
fn parse_size(value: &str) -> Result<u64, ProtocolError> {
    let digits = value.strip_suffix(';').unwrap_or(value);
    digits
        .parse::<u64>()
        .map_err(|_| ProtocolError::InvalidSize(value.to_string()))
}

/// Rejects names that cannot be represented in the header grammar.
pub fn validate_name(name: &str) -> Result<(), ProtocolError> {
    if name.is_empty() || name == NULL_NAME || name.contains([',', '\0']) {
        return Err(ProtocolError::InvalidName(name.to_string()));
    }
    Ok(())
}
