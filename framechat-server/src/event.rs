//! Events surfaced to whatever renders the server.

use framechat_protocol::{AttachmentOffer, ErrorKind, PeerId};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Something that happened on the server.
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A peer was accepted and told its identity.
    PeerJoined { id: PeerId, addr: SocketAddr },
    /// A peer was removed from the registry.
    PeerLeft { id: PeerId },
    MessageReceived { from: PeerId, text: String },
    /// An attachment is parked until accepted or discarded.
    AttachmentOffered(AttachmentOffer),
    /// An attachment was dropped because its sender has too many waiting.
    AttachmentRejected {
        from: PeerId,
        file_name: String,
        size: u64,
    },
    /// A connection failed and is being closed.
    ConnectionError {
        id: PeerId,
        kind: ErrorKind,
        message: String,
    },
    /// A connection reached `Closed`.
    Disconnected { id: PeerId },
}

pub type EventSender = mpsc::UnboundedSender<ServerEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ServerEvent>;
