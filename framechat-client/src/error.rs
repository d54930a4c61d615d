//! Client error types.

use framechat_protocol::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] framechat_protocol::ProtocolError),

    #[error("failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {timeout:?} connecting to {addr}")]
    ConnectTimeout { addr: String, timeout: Duration },

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,
}

impl ClientError {
    /// Returns the collaborator-facing kind, if this error has one.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ClientError::Protocol(e) => Some(e.kind()),
            ClientError::NotConnected => Some(ErrorKind::NotConnected),
            ClientError::Io(_) => Some(ErrorKind::Transport),
            _ => None,
        }
    }

    /// Returns whether the session cannot start.
    pub fn is_connect_failure(&self) -> bool {
        matches!(
            self,
            ClientError::ConnectFailed { .. } | ClientError::ConnectTimeout { .. }
        )
    }
}
