//! Server error types.

use framechat_protocol::{ErrorKind, PeerId};
use std::net::SocketAddr;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] framechat_protocol::ProtocolError),

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("peer not found: {0}")]
    PeerNotFound(PeerId),

    #[error("connection limit reached, rejected {0}")]
    ConnectionLimit(SocketAddr),

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Returns the collaborator-facing kind, if this error has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ServerError::Protocol(e) => Some(e.kind()),
            ServerError::PeerNotFound(_) => Some(ErrorKind::PeerNotFound),
            ServerError::Io(_) => Some(ErrorKind::Transport),
            ServerError::Bind { .. } | ServerError::ConnectionLimit(_) | ServerError::ShuttingDown => {
                None
            }
        }
    }

    /// Returns whether the server cannot keep serving after this error.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(self, ServerError::Bind { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framechat_protocol::ProtocolError;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ServerError::PeerNotFound(PeerId(4)).kind(),
            Some(ErrorKind::PeerNotFound)
        );
        assert_eq!(
            ServerError::Protocol(ProtocolError::NotOpen).kind(),
            Some(ErrorKind::NotConnected)
        );
        assert_eq!(ServerError::ShuttingDown.kind(), None);
    }

    #[test]
    fn test_bind_is_startup_fatal() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:8080".parse().unwrap(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert!(err.is_startup_fatal());
        assert!(err.to_string().contains("127.0.0.1:8080"));
        assert!(!ServerError::PeerNotFound(PeerId(1)).is_startup_fatal());
    }
}
