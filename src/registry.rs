//! Set of live room connections.
//!
//! Each connection is a bounded queue drained by that peer's writer task.
//! Delivering to a peer means pushing onto its queue; a peer whose queue is
//! closed (writer gone) or full (peer not keeping up) has failed and is
//! dropped from the room, and its session is told to end.

use std::{collections::HashSet, fmt, sync::Arc};

use axum::extract::ws::{CloseFrame, Utf8Bytes};
use dashmap::DashMap;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(Uuid);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A frame waiting to be written to one peer.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A persisted chat message; `id` lets the writer skip what replay already covered.
    Chat { id: i64, text: Utf8Bytes },
    /// Anything else, written as-is.
    Text(Utf8Bytes),
    /// Close the socket, then stop writing.
    Close(CloseFrame),
}

/// Handle to one peer's outbound queue.
#[derive(Debug, Clone)]
pub struct Connection {
    id: ConnId,
    tx: mpsc::Sender<Outbound>,
    evicted: Arc<Notify>,
}

impl Connection {
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Queues a frame for this peer only. Returns `false` if it could not be queued.
    pub fn send(&self, frame: Outbound) -> bool {
        self.tx.try_send(frame).is_ok()
    }

    /// Resolves once a broadcast has dropped this connection from the room.
    pub async fn evicted(&self) {
        self.evicted.notified().await
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    peers: DashMap<ConnId, Connection>,
    queue_len: usize,
}

impl ConnectionRegistry {
    pub fn new(queue_len: usize) -> Self {
        ConnectionRegistry {
            peers: DashMap::new(),
            queue_len: queue_len.max(1),
        }
    }

    /// Creates a connection with a fresh identity. It is not a member until [`register`](Self::register).
    pub fn open(&self) -> (Connection, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(self.queue_len);
        let conn = Connection {
            id: ConnId(Uuid::now_v7()),
            tx,
            evicted: Arc::new(Notify::new()),
        };
        (conn, rx)
    }

    /// Adds `conn`. Returns `false` and changes nothing if it is already a member.
    pub fn register(&self, conn: &Connection) -> bool {
        match self.peers.entry(conn.id) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(conn.clone());
                info!("connection {} joined ({} online)", conn.id, self.peers.len());
                true
            }
        }
    }

    /// Removes `id` if present. Safe to call any number of times.
    pub fn unregister(&self, id: ConnId) -> bool {
        let removed = self.peers.remove(&id).is_some();
        if removed {
            info!("connection {id} left ({} online)", self.peers.len());
        }
        removed
    }

    /// Scoped membership: registers `conn` and unregisters it when the guard drops.
    pub fn enter(self: &Arc<Self>, conn: &Connection) -> Registration {
        self.register(conn);
        Registration {
            registry: self.clone(),
            id: conn.id,
        }
    }

    /// Delivers `frame` to every member except `exclude`.
    ///
    /// Membership is snapshotted first so no map lock is held while sending.
    /// Members that could not take the frame are removed and signalled
    /// through [`Connection::evicted`] before returning, then handed back to
    /// the caller.
    pub fn broadcast(&self, frame: &Outbound, exclude: Option<ConnId>) -> HashSet<ConnId> {
        let snapshot: Vec<Connection> = self
            .peers
            .iter()
            .filter(|entry| Some(*entry.key()) != exclude)
            .map(|entry| entry.value().clone())
            .collect();

        let mut failed = HashSet::new();
        for conn in snapshot {
            if conn.send(frame.clone()) {
                continue;
            }
            debug!("dropping connection {} after failed delivery", conn.id);
            if self.unregister(conn.id) {
                conn.evicted.notify_one();
            }
            failed.insert(conn.id);
        }

        failed
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.peers.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// Membership that ends when this guard is dropped.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: ConnId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &'static str) -> Outbound {
        Outbound::Text(Utf8Bytes::from_static(s))
    }

    fn received(rx: &mut mpsc::Receiver<Outbound>) -> Vec<String> {
        let mut out = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            match frame {
                Outbound::Chat { text, .. } | Outbound::Text(text) => out.push(text.as_str().to_owned()),
                Outbound::Close(_) => out.push("<close>".to_owned()),
            }
        }
        out
    }

    #[test]
    fn register_twice_is_a_noop() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.open();

        assert!(registry.register(&conn));
        assert!(!registry.register(&conn));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ConnectionRegistry::new(8);
        let (conn, _rx) = registry.open();
        registry.register(&conn);

        assert!(registry.unregister(conn.id()));
        assert!(!registry.unregister(conn.id()));
        assert!(registry.is_empty());
    }

    #[test]
    fn broadcast_skips_excluded_connection() {
        let registry = ConnectionRegistry::new(8);
        let (a, mut a_rx) = registry.open();
        let (b, mut b_rx) = registry.open();
        registry.register(&a);
        registry.register(&b);

        let failed = registry.broadcast(&text("offer"), Some(a.id()));

        assert!(failed.is_empty());
        assert!(received(&mut a_rx).is_empty());
        assert_eq!(received(&mut b_rx), vec!["offer"]);
    }

    #[test]
    fn dead_peer_is_removed_without_affecting_others() {
        let registry = ConnectionRegistry::new(8);
        let (a, mut a_rx) = registry.open();
        let (b, b_rx) = registry.open();
        let (c, mut c_rx) = registry.open();
        for conn in [&a, &b, &c] {
            registry.register(conn);
        }
        drop(b_rx);

        let failed = registry.broadcast(&text("one"), None);
        assert_eq!(failed, HashSet::from([b.id()]));
        assert!(!registry.contains(b.id()));

        let failed = registry.broadcast(&text("two"), None);
        assert!(failed.is_empty());
        assert_eq!(received(&mut a_rx), vec!["one", "two"]);
        assert_eq!(received(&mut c_rx), vec!["one", "two"]);
    }

    #[test]
    fn peer_with_full_queue_counts_as_failed() {
        let registry = ConnectionRegistry::new(1);
        let (slow, _slow_rx) = registry.open();
        registry.register(&slow);

        assert!(registry.broadcast(&text("fits"), None).is_empty());
        assert_eq!(registry.broadcast(&text("overflows"), None), HashSet::from([slow.id()]));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn dropped_peer_is_told_it_was_evicted() {
        let registry = ConnectionRegistry::new(1);
        let (slow, _slow_rx) = registry.open();
        let (fast, mut fast_rx) = registry.open();
        registry.register(&slow);
        registry.register(&fast);

        registry.broadcast(&text("fits"), None);
        received(&mut fast_rx);
        registry.broadcast(&text("overflows"), None);

        tokio::time::timeout(std::time::Duration::from_secs(1), slow.evicted())
            .await
            .unwrap();
        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), fast.evicted())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn explicit_unregister_does_not_signal_eviction() {
        let registry = ConnectionRegistry::new(1);
        let (conn, _rx) = registry.open();
        registry.register(&conn);
        registry.unregister(conn.id());

        assert!(
            tokio::time::timeout(std::time::Duration::from_millis(50), conn.evicted())
                .await
                .is_err()
        );
    }

    #[test]
    fn registration_guard_unregisters_once_on_drop() {
        let registry = Arc::new(ConnectionRegistry::new(8));
        let (conn, _rx) = registry.open();

        let guard = registry.enter(&conn);
        assert!(registry.contains(conn.id()));

        // an earlier failed broadcast may already have removed it
        registry.unregister(conn.id());
        drop(guard);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn concurrent_joins_and_leaves_keep_membership_consistent() {
        let registry = Arc::new(ConnectionRegistry::new(64));

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let (conn, _rx) = registry.open();
                    registry.register(&conn);
                    registry.broadcast(&text("tick"), Some(conn.id()));
                    if i % 2 == 0 {
                        registry.unregister(conn.id());
                        None
                    } else {
                        Some((conn, _rx))
                    }
                })
            })
            .collect();

        let mut kept = Vec::new();
        for task in tasks {
            if let Some(pair) = task.await.unwrap() {
                kept.push(pair);
            }
        }

        for (conn, _) in &kept {
            assert!(registry.contains(conn.id()));
        }
        assert_eq!(registry.len(), kept.len());
    }
}
