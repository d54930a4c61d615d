//! Routing of outbound frames to registered peers.

use crate::error::ServerError;
use crate::registry::PeerRegistry;
use framechat_protocol::{Frame, PeerId, ProtocolError};
use futures::future::join_all;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Where an outbound frame goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    /// Every registered peer.
    Broadcast,
    /// A single peer.
    Peer(PeerId),
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Broadcast => write!(f, "broadcast"),
            Destination::Peer(id) => write!(f, "{}", id),
        }
    }
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("broadcast") || s.eq_ignore_ascii_case("all") || s == "*" {
            return Ok(Destination::Broadcast);
        }
        s.parse::<PeerId>()
            .map(Destination::Peer)
            .map_err(|_| format!("invalid destination '{}': expected 'broadcast' or a peer id", s))
    }
}

/// A send that failed for one peer.
#[derive(Debug)]
pub struct RouteFailure {
    pub peer: PeerId,
    pub error: ProtocolError,
}

/// Per-peer outcome of a routed send.
#[derive(Debug, Default)]
pub struct RouteReport {
    pub delivered: Vec<PeerId>,
    pub failed: Vec<RouteFailure>,
}

impl RouteReport {
    /// Returns whether every targeted peer received the frame.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Default limit on how long one peer may take to accept a frame.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends frames to peers chosen by a [`Destination`].
#[derive(Clone)]
pub struct Router {
    registry: Arc<PeerRegistry>,
    write_timeout: Duration,
}

impl Router {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self {
            registry,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Sets how long a single peer's write may take before that peer is
    /// dropped.
    pub fn with_write_timeout(mut self, limit: Duration) -> Self {
        self.write_timeout = limit;
        self
    }

    /// Routes one frame.
    ///
    /// Broadcast is best-effort: copies are written to all targets
    /// concurrently, a failed or stalled send is recorded, and the remaining
    /// peers still receive their copy. Unicast to an unknown peer fails with
    /// [`ServerError::PeerNotFound`].
    pub async fn route(
        &self,
        destination: Destination,
        frame: &Frame,
    ) -> Result<RouteReport, ServerError> {
        let encoded = frame.encode()?;

        let targets = match destination {
            Destination::Broadcast => self.registry.snapshot(),
            Destination::Peer(id) => {
                let connection = self
                    .registry
                    .get(id)
                    .ok_or(ServerError::PeerNotFound(id))?;
                vec![(id, connection)]
            }
        };

        let sends = targets.into_iter().map(|(peer, connection)| {
            let encoded = &encoded;
            async move {
                let result = connection
                    .send_encoded_within(encoded, self.write_timeout)
                    .await;
                (peer, result)
            }
        });

        let mut report = RouteReport::default();
        for (peer, result) in join_all(sends).await {
            match result {
                Ok(()) => {
                    tracing::debug!("[peer {}] Sent {} frame ({} bytes)", peer, frame.kind, encoded.len());
                    report.delivered.push(peer);
                }
                Err(error) => {
                    tracing::warn!("[peer {}] Send failed: {}", peer, error);
                    report.failed.push(RouteFailure { peer, error });
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use framechat_protocol::{Connection, ErrorKind, FrameReader};
    use std::net::SocketAddr;
    use tokio::io::{duplex, DuplexStream, ReadHalf};
    use tokio::time::timeout;

    fn addr() -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 0))
    }

    /// Registers a peer backed by an in-memory pipe and returns the far end.
    fn add_peer(registry: &PeerRegistry) -> (PeerId, DuplexStream) {
        let (near, far) = duplex(64 * 1024);
        let (connection, _read_half) = Connection::split(near);
        (registry.register(connection, addr()), far)
    }

    async fn read_all(stream: DuplexStream) -> Vec<Frame> {
        let (connection, read_half): (Connection, ReadHalf<DuplexStream>) =
            Connection::split(stream);
        let mut frames = Vec::new();
        connection
            .read_frames(read_half, FrameReader::default(), 1024, |f| frames.push(f))
            .await;
        frames
    }

    #[test]
    fn test_destination_parse() {
        assert_eq!("broadcast".parse::<Destination>().unwrap(), Destination::Broadcast);
        assert_eq!("ALL".parse::<Destination>().unwrap(), Destination::Broadcast);
        assert_eq!(" 7 ".parse::<Destination>().unwrap(), Destination::Peer(PeerId(7)));
        assert!("seven".parse::<Destination>().is_err());
        assert_eq!(Destination::Peer(PeerId(3)).to_string(), "3");
    }

    #[tokio::test]
    async fn test_unicast() {
        let registry = Arc::new(PeerRegistry::new());
        let (a, far_a) = add_peer(&registry);
        let (_b, far_b) = add_peer(&registry);
        let router = Router::new(registry.clone());

        let report = router
            .route(Destination::Peer(a), &Frame::message("just you"))
            .await
            .unwrap();
        assert_eq!(report.delivered, vec![a]);
        assert!(report.is_complete());

        for (_, conn) in registry.snapshot() {
            conn.close().await;
        }
        assert_eq!(read_all(far_a).await.len(), 1);
        assert!(read_all(far_b).await.is_empty());
    }

    #[tokio::test]
    async fn test_unicast_unknown_peer() {
        let registry = Arc::new(PeerRegistry::new());
        let router = Router::new(registry);

        let result = router
            .route(Destination::Peer(PeerId(42)), &Frame::message("hi"))
            .await;
        assert!(matches!(result, Err(ServerError::PeerNotFound(PeerId(42)))));
    }

    #[tokio::test]
    async fn test_broadcast_with_one_failed_peer() {
        let registry = Arc::new(PeerRegistry::new());
        let (a, far_a) = add_peer(&registry);
        let (b, far_b) = add_peer(&registry);
        let (c, far_c) = add_peer(&registry);
        drop(far_b);

        let router = Router::new(registry.clone());
        let report = router
            .route(Destination::Broadcast, &Frame::message("everyone"))
            .await
            .unwrap();

        assert_eq!(report.delivered, vec![a, c]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].peer, b);

        for (_, conn) in registry.snapshot() {
            conn.close().await;
        }
        for far in [far_a, far_c] {
            let frames = read_all(far).await;
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].text(), "everyone");
        }
    }

    #[tokio::test]
    async fn test_broadcast_does_not_wait_on_stalled_peer() {
        let registry = Arc::new(PeerRegistry::new());
        let (a, far_a) = add_peer(&registry);
        // Never read: a 4 KiB frame cannot fit in this pipe
        let (near, _stalled) = duplex(256);
        let (connection, _read_half) = Connection::split(near);
        let stalled = registry.register(connection, addr());
        let (c, far_c) = add_peer(&registry);

        let router = Router::new(registry.clone()).with_write_timeout(Duration::from_millis(100));
        let frame = Frame::attachment("big.bin", Bytes::from(vec![3u8; 4096])).unwrap();
        let report = timeout(Duration::from_secs(2), router.route(Destination::Broadcast, &frame))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.delivered, vec![a, c]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].peer, stalled);
        assert_eq!(report.failed[0].error.kind(), ErrorKind::Transport);
        assert!(!registry.get(stalled).unwrap().is_open());

        for (_, conn) in registry.snapshot() {
            conn.close().await;
        }
        for far in [far_a, far_c] {
            let frames = read_all(far).await;
            assert_eq!(frames.len(), 1);
            assert_eq!(frames[0].payload.len(), 4096);
        }
    }

    #[tokio::test]
    async fn test_broadcast_to_empty_registry() {
        let router = Router::new(Arc::new(PeerRegistry::new()));
        let report = router
            .route(Destination::Broadcast, &Frame::message("anyone?"))
            .await
            .unwrap();
        assert!(report.delivered.is_empty());
        assert!(report.is_complete());
    }
}
