//! Protocol error types and error kinds.

use crate::frame::PeerId;
use crate::offer::OfferId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Protocol-level errors that can occur during framing or connection handling.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown frame kind: {0:?}")]
    UnknownKind(String),

    #[error("missing required header field: {0}")]
    MissingField(&'static str),

    #[error("duplicate header field: {0}")]
    DuplicateField(&'static str),

    #[error("unrecognised header field: {0:?}")]
    UnknownField(String),

    #[error("malformed header token: {0:?}")]
    MalformedToken(String),

    #[error("invalid fileSize value: {0:?}")]
    InvalidSize(String),

    #[error("header too long: {len} bytes (width {width})")]
    HeaderTooLong { len: usize, width: usize },

    #[error("invalid attachment name: {0:?}")]
    InvalidName(String),

    #[error("declared size {declared} does not match expected size {expected}")]
    SizeMismatch { declared: u64, expected: u64 },

    #[error("descriptor payload must be 4 bytes, got {0}")]
    InvalidDescriptor(usize),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u64, max: u64 },

    #[error("invalid UTF-8 in header")]
    InvalidUtf8,

    #[error("stream is corrupted by an earlier malformed frame")]
    StreamCorrupted,

    #[error("connection is not open")]
    NotOpen,

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),

    #[error("attachment offer not found: {0}")]
    OfferNotFound(OfferId),

    #[error("peer {peer} already has {limit} attachments pending")]
    PendingLimit { peer: PeerId, limit: usize },

    #[error("failed to write attachment to {}: {source}", path.display())]
    AttachmentWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns the collaborator-facing kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::FrameTooLarge { .. } => ErrorKind::FrameTooLarge,
            ProtocolError::NotOpen => ErrorKind::NotConnected,
            ProtocolError::Io(_) | ProtocolError::WriteTimeout(_) => ErrorKind::Transport,
            ProtocolError::SizeMismatch { .. } => ErrorKind::SizeMismatch,
            ProtocolError::OfferNotFound(_) => ErrorKind::OfferNotFound,
            ProtocolError::PendingLimit { .. } => ErrorKind::PendingLimit,
            ProtocolError::AttachmentWrite { .. } => ErrorKind::AttachmentWrite,
            _ => ErrorKind::MalformedFrame,
        }
    }
}

/// Stable error kinds surfaced to whatever renders connection events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    // Per-connection fatal
    MalformedFrame,
    FrameTooLarge,
    Transport,

    // Operation-local
    SizeMismatch,
    PeerNotFound,
    NotConnected,
    OfferNotFound,
    PendingLimit,
    AttachmentWrite,
}

impl ErrorKind {
    /// Returns whether this kind closes the affected connection.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::MalformedFrame
                | ErrorKind::FrameTooLarge
                | ErrorKind::Transport
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MalformedFrame => write!(f, "MALFORMED_FRAME"),
            ErrorKind::FrameTooLarge => write!(f, "FRAME_TOO_LARGE"),
            ErrorKind::Transport => write!(f, "TRANSPORT"),
            ErrorKind::SizeMismatch => write!(f, "SIZE_MISMATCH"),
            ErrorKind::PeerNotFound => write!(f, "PEER_NOT_FOUND"),
            ErrorKind::NotConnected => write!(f, "NOT_CONNECTED"),
            ErrorKind::OfferNotFound => write!(f, "OFFER_NOT_FOUND"),
            ErrorKind::PendingLimit => write!(f, "PENDING_LIMIT"),
            ErrorKind::AttachmentWrite => write!(f, "ATTACHMENT_WRITE"),
        }
    }
}
