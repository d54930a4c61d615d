//! Live peer registry.
//!
//! Every mutation and every snapshot taken for routing goes through one
//! registry-wide lock, so a broadcast never observes a half-removed peer and
//! two concurrent accepts never receive the same identity.

use chrono::{DateTime, Utc};
use framechat_protocol::{Connection, PeerId};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// A registered peer.
#[derive(Debug, Clone)]
pub struct PeerEntry {
    pub connection: Connection,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
    /// Registration order; identities stop following it once the counter wraps.
    seq: u64,
}

/// Listing entry for a registered peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerInfo {
    pub id: u32,
    pub addr: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

struct RegistryInner {
    next_id: u32,
    next_seq: u64,
    peers: BTreeMap<PeerId, PeerEntry>,
}

impl RegistryInner {
    fn insert(&mut self, id: PeerId, connection: Connection, addr: SocketAddr) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.peers.insert(
            id,
            PeerEntry {
                connection,
                addr,
                connected_at: Utc::now(),
                seq,
            },
        );
    }

    /// Live entries in registration order.
    fn in_order(&self) -> Vec<(&PeerId, &PeerEntry)> {
        let mut entries: Vec<_> = self.peers.iter().collect();
        entries.sort_by_key(|(_, entry)| entry.seq);
        entries
    }

    fn allocate(&mut self) -> PeerId {
        loop {
            let id = PeerId(self.next_id);
            // Zero is never handed out; wrapping skips it
            self.next_id = if id >= PeerId::MAX { 1 } else { self.next_id + 1 };
            if !self.peers.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Mapping of identity to live connection.
pub struct PeerRegistry {
    inner: Mutex<RegistryInner>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                next_id: 1,
                next_seq: 0,
                peers: BTreeMap::new(),
            }),
        }
    }

    /// Reserves the next identity without registering anything under it.
    ///
    /// Identities increase monotonically, so a reserved value is not handed
    /// out again until the counter wraps.
    pub fn allocate_id(&self) -> PeerId {
        self.inner.lock().allocate()
    }

    /// Registers a connection under a previously allocated identity.
    ///
    /// Returns `false` if the identity is already live.
    pub fn insert(&self, id: PeerId, connection: Connection, addr: SocketAddr) -> bool {
        let mut inner = self.inner.lock();
        if inner.peers.contains_key(&id) {
            return false;
        }
        inner.insert(id, connection, addr);
        true
    }

    /// Allocates an identity and registers the connection in one step.
    pub fn register(&self, connection: Connection, addr: SocketAddr) -> PeerId {
        let mut inner = self.inner.lock();
        let id = inner.allocate();
        inner.insert(id, connection, addr);
        id
    }

    /// Removes a peer. Removing an absent identity is a no-op.
    pub fn remove(&self, id: PeerId) -> Option<PeerEntry> {
        let removed = self.inner.lock().peers.remove(&id);
        if removed.is_none() {
            tracing::debug!("[peer {}] Already removed from registry", id);
        }
        removed
    }

    /// Returns the connection registered under `id`.
    pub fn get(&self, id: PeerId) -> Option<Connection> {
        self.inner
            .lock()
            .peers
            .get(&id)
            .map(|entry| entry.connection.clone())
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.inner.lock().peers.contains_key(&id)
    }

    /// Returns every live connection in registration order, taken under the
    /// lock.
    pub fn snapshot(&self) -> Vec<(PeerId, Connection)> {
        self.inner
            .lock()
            .in_order()
            .into_iter()
            .map(|(id, entry)| (*id, entry.connection.clone()))
            .collect()
    }

    /// Lists registered peers in registration order.
    pub fn list(&self) -> Vec<PeerInfo> {
        self.inner
            .lock()
            .in_order()
            .into_iter()
            .map(|(id, entry)| PeerInfo {
                id: id.0,
                addr: entry.addr,
                connected_at: entry.connected_at,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().peers.is_empty()
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn connection() -> Connection {
        Connection::new(tokio::io::sink())
    }

    #[test]
    fn test_register_and_remove() {
        let registry = PeerRegistry::new();
        let a = registry.register(connection(), addr(1));
        let b = registry.register(connection(), addr(2));

        assert_eq!(a, PeerId(1));
        assert_eq!(b, PeerId(2));
        assert_eq!(registry.len(), 2);

        assert!(registry.remove(a).is_some());
        assert!(registry.remove(a).is_none());
        assert!(!registry.contains(a));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_identities_not_reused_after_removal() {
        let registry = PeerRegistry::new();
        let a = registry.register(connection(), addr(1));
        registry.remove(a);

        let b = registry.register(connection(), addr(2));
        assert_ne!(a, b);
    }

    #[test]
    fn test_insert_refuses_live_identity() {
        let registry = PeerRegistry::new();
        let id = registry.allocate_id();
        assert!(registry.insert(id, connection(), addr(1)));
        assert!(!registry.insert(id, connection(), addr(2)));
        assert_eq!(registry.list()[0].addr, addr(1));
    }

    #[test]
    fn test_wraparound_skips_live_identities() {
        let registry = PeerRegistry::new();
        let first = registry.register(connection(), addr(1));
        registry.inner.lock().next_id = PeerId::MAX.0;

        let last = registry.register(connection(), addr(2));
        assert_eq!(last, PeerId::MAX);

        // 1 is still live, so the counter moves past it
        let next = registry.register(connection(), addr(3));
        assert_eq!(first, PeerId(1));
        assert_eq!(next, PeerId(2));
    }

    #[test]
    fn test_list_order() {
        let registry = PeerRegistry::new();
        for port in 1..=3 {
            registry.register(connection(), addr(port));
        }
        let ports: Vec<u16> = registry.list().iter().map(|p| p.addr.port()).collect();
        assert_eq!(ports, vec![1, 2, 3]);
    }

    #[test]
    fn test_list_follows_registration_across_wrap() {
        let registry = PeerRegistry::new();
        let first = registry.register(connection(), addr(1));
        registry.inner.lock().next_id = PeerId::MAX.0 - 1;
        let near_max = registry.register(connection(), addr(2));
        let max = registry.register(connection(), addr(3));
        let wrapped = registry.register(connection(), addr(4));
        assert_eq!(wrapped, PeerId(2));

        let ids: Vec<u32> = registry.list().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![first.0, near_max.0, max.0, wrapped.0]);

        let routed: Vec<PeerId> = registry.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(routed, vec![first, near_max, max, wrapped]);
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(PeerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    (0..50)
                        .map(|i| registry.register(connection(), addr(t * 100 + i)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id));
            }
        }
        assert_eq!(registry.len(), 400);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Accept,
        Disconnect(usize),
    }

    fn arb_ops() -> impl Strategy<Value = Vec<Op>> {
        proptest::collection::vec(
            prop_oneof![Just(Op::Accept), any::<usize>().prop_map(Op::Disconnect)],
            0..200,
        )
    }

    proptest! {
        #[test]
        fn prop_live_identities_unique(ops in arb_ops()) {
            let registry = PeerRegistry::new();
            let mut live: Vec<PeerId> = Vec::new();

            for op in ops {
                match op {
                    Op::Accept => {
                        let id = registry.register(connection(), addr(0));
                        prop_assert!(!live.contains(&id));
                        live.push(id);
                    }
                    Op::Disconnect(i) if !live.is_empty() => {
                        let id = live.remove(i % live.len());
                        prop_assert!(registry.remove(id).is_some());
                    }
                    Op::Disconnect(_) => {}
                }

                let listed: Vec<u32> = registry.list().iter().map(|p| p.id).collect();
                let expected: Vec<u32> = live.iter().map(|id| id.0).collect();
                prop_assert_eq!(listed, expected);
            }
        }
    }
}
