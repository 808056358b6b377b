//! Bounded pool of active relay connections
//!
//! All mutation and capacity checks happen under one mutex, so checking for
//! room and inserting is a single atomic step. Readers work on snapshots.

use crate::connection::{RelayConnection, same_connection};
use crate::peer::PeerAddress;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the data if another thread panicked while holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Result of offering a connection to the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolInsert {
    /// Connection was added
    Added,
    /// Pool was already at capacity
    Full,
    /// A connection to the same relay peer is already pooled
    Duplicate,
}

/// Bounded collection of live relay connections
pub struct RelayPool {
    capacity: usize,
    relays: Mutex<Vec<Arc<dyn RelayConnection>>>,
}

impl RelayPool {
    /// Create an empty pool holding at most `capacity` relays
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            relays: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Maximum number of relays
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of relays
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.relays).len()
    }

    /// Whether the pool is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        lock(&self.relays).is_empty()
    }

    /// Free slots left
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.len())
    }

    /// Insert `connection` if there is room and its relay is not pooled yet
    pub fn add(&self, connection: Arc<dyn RelayConnection>) -> PoolInsert {
        let mut relays = lock(&self.relays);
        if relays.len() >= self.capacity {
            return PoolInsert::Full;
        }
        if relays
            .iter()
            .any(|r| r.relay_address() == connection.relay_address())
        {
            return PoolInsert::Duplicate;
        }
        relays.push(connection);
        PoolInsert::Added
    }

    /// Remove `connection` by identity; returns false if it was not pooled
    pub fn remove(&self, connection: &Arc<dyn RelayConnection>) -> bool {
        let mut relays = lock(&self.relays);
        match relays.iter().position(|r| same_connection(r, connection)) {
            Some(index) => {
                relays.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether a connection to `peer` is pooled
    #[must_use]
    pub fn contains_peer(&self, peer: &PeerAddress) -> bool {
        lock(&self.relays).iter().any(|r| r.relay_address() == peer)
    }

    /// Copy of the current contents
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<dyn RelayConnection>> {
        lock(&self.relays).clone()
    }

    /// Remove and return every connection
    pub fn drain(&self) -> Vec<Arc<dyn RelayConnection>> {
        std::mem::take(&mut *lock(&self.relays))
    }
}

impl fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayPool")
            .field("capacity", &self.capacity)
            .field("relays", &*lock(&self.relays))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::PushRelayConnection;
    use crate::peer::{PeerId, PeerSocketAddress};
    use std::net::{IpAddr, Ipv4Addr};

    fn relay(id: u8) -> Arc<dyn RelayConnection> {
        PushRelayConnection::new(PeerAddress::new(
            PeerId::from_bytes([id; 32]),
            PeerSocketAddress::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, id)), 4000, 4000),
        ))
    }

    #[test]
    fn test_add_respects_capacity() {
        let pool = RelayPool::new(2);
        assert_eq!(pool.add(relay(1)), PoolInsert::Added);
        assert_eq!(pool.add(relay(2)), PoolInsert::Added);
        assert_eq!(pool.add(relay(3)), PoolInsert::Full);
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.remaining(), 0);
    }

    #[test]
    fn test_duplicate_relay_rejected() {
        let pool = RelayPool::new(5);
        assert_eq!(pool.add(relay(1)), PoolInsert::Added);
        assert_eq!(pool.add(relay(1)), PoolInsert::Duplicate);
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_remove_is_by_identity_and_idempotent() {
        let pool = RelayPool::new(5);
        let a = relay(1);
        let twin = relay(1);
        pool.add(Arc::clone(&a));

        assert!(!pool.remove(&twin));
        assert!(pool.remove(&a));
        assert!(!pool.remove(&a));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_snapshot_is_detached() {
        let pool = RelayPool::new(5);
        pool.add(relay(1));
        let snapshot = pool.snapshot();
        pool.add(relay(2));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(pool.len(), 2);
        assert!(pool.contains_peer(snapshot[0].relay_address()));
    }

    #[test]
    fn test_drain() {
        let pool = RelayPool::new(5);
        pool.add(relay(1));
        pool.add(relay(2));

        assert_eq!(pool.drain().len(), 2);
        assert!(pool.is_empty());
        assert!(pool.drain().is_empty());
    }

    #[test]
    fn test_concurrent_adds_never_overfill() {
        let pool = Arc::new(RelayPool::new(5));
        let handles: Vec<_> = (0..32u8)
            .map(|i| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || pool.add(relay(i)))
            })
            .collect();

        let added = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| *r == PoolInsert::Added)
            .count();

        assert_eq!(added, 5);
        assert_eq!(pool.len(), 5);
    }
}
