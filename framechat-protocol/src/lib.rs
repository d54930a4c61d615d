//! # framechat-protocol
//!
//! Wire protocol implementation for framechat.
//!
//! This crate provides:
//! - The fixed-width ASCII header and frame model
//! - Incremental decoding with partial-read retention
//! - A connection wrapper with serialized writes and a single read loop
//! - Parked attachment offers awaiting a user decision
//! - Error types and collaborator-facing error kinds

pub mod codec;
pub mod connection;
pub mod error;
pub mod frame;
pub mod header;
pub mod offer;

pub use codec::{Decoder, Encoder};
pub use connection::{
    Connection, ConnectionState, FrameReader, ReadOutcome, DEFAULT_READ_BUFFER_SIZE,
};
pub use error::{ErrorKind, ProtocolError};
pub use frame::{DecodeResult, Frame, PeerId};
pub use header::{FrameHeader, FrameKind, HEADER_WIDTH};
pub use offer::{
    default_save_path, AttachmentOffer, Disposition, OfferId, PendingAttachments, Resolution,
};

/// Default TCP port for the framechat server.
pub const DEFAULT_PORT: u16 = 8080;

/// Default ceiling on a single frame body (64 MiB).
pub const DEFAULT_MAX_PAYLOAD: u64 = 64 * 1024 * 1024;
