//! Failed relay candidate cache
//!
//! Remembers peers that recently declined a relay request or whose relay
//! connection dropped, so the next setup rounds skip them. Entries expire
//! after a fixed wait time; expired entries are pruned lazily on lookup and
//! insertion instead of by a background task.

use crate::peer::PeerAddress;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Expiring set of failed relay candidates
#[derive(Debug)]
pub struct FailedRelayCache {
    /// Candidate -> expiry instant
    entries: DashMap<PeerAddress, Instant>,
    /// Time an entry stays valid
    ttl: Duration,
}

impl FailedRelayCache {
    /// Create a cache whose entries live for `ttl`
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Entry lifetime
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a failed candidate, restarting its wait time
    pub fn add(&self, address: &PeerAddress) {
        self.add_at(address, Instant::now());
    }

    /// Whether `address` failed within the wait time
    #[must_use]
    pub fn contains(&self, address: &PeerAddress) -> bool {
        self.contains_at(address, Instant::now())
    }

    /// Drop every candidate that is currently cached
    pub fn remove_failed(&self, candidates: &mut Vec<PeerAddress>) {
        let now = Instant::now();
        candidates.retain(|candidate| !self.contains_at(candidate, now));
    }

    /// Number of unexpired entries
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| *e.value() >= now).count()
    }

    /// Whether no unexpired entry exists
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn add_at(&self, address: &PeerAddress, now: Instant) {
        self.entries.retain(|_, expiry| *expiry >= now);
        self.entries.insert(address.clone(), now + self.ttl);
    }

    /// An entry is live up to and including its expiry instant
    pub(crate) fn contains_at(&self, address: &PeerAddress, now: Instant) -> bool {
        let live = match self.entries.get(address) {
            Some(expiry) => *expiry >= now,
            None => return false,
        };
        if !live {
            // a concurrent add may have refreshed the entry since the read
            self.entries.remove_if(address, |_, expiry| *expiry < now);
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::{PeerId, PeerSocketAddress};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::Arc;

    fn addr(id: u8) -> PeerAddress {
        PeerAddress::new(
            PeerId::from_bytes([id; 32]),
            PeerSocketAddress::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 4000, 4000),
        )
    }

    #[test]
    fn test_contains_after_add() {
        let cache = FailedRelayCache::new(Duration::from_secs(60));
        assert!(!cache.contains(&addr(1)));

        cache.add(&addr(1));
        assert!(cache.contains(&addr(1)));
        assert!(!cache.contains(&addr(2)));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_expiry_boundary() {
        let ttl = Duration::from_secs(10);
        let cache = FailedRelayCache::new(ttl);
        let start = Instant::now();

        cache.add_at(&addr(1), start);
        assert!(cache.contains_at(&addr(1), start + ttl - Duration::from_millis(1)));
        assert!(cache.contains_at(&addr(1), start + ttl));
        assert!(!cache.contains_at(&addr(1), start + ttl + Duration::from_nanos(1)));

        // expired entry was pruned on lookup
        assert!(cache.entries.is_empty());
    }

    #[test]
    fn test_readd_restarts_wait_time() {
        let ttl = Duration::from_secs(10);
        let cache = FailedRelayCache::new(ttl);
        let start = Instant::now();

        cache.add_at(&addr(1), start);
        cache.add_at(&addr(1), start + Duration::from_secs(5));
        assert!(cache.contains_at(&addr(1), start + Duration::from_secs(12)));
    }

    #[test]
    fn test_insert_prunes_expired() {
        let ttl = Duration::from_secs(1);
        let cache = FailedRelayCache::new(ttl);
        let start = Instant::now();

        cache.add_at(&addr(1), start);
        cache.add_at(&addr(2), start + Duration::from_secs(5));

        assert_eq!(cache.entries.len(), 1);
        assert!(cache.entries.contains_key(&addr(2)));
    }

    #[test]
    fn test_remove_failed() {
        let cache = FailedRelayCache::new(Duration::from_secs(60));
        cache.add(&addr(2));

        let mut candidates = vec![addr(1), addr(2), addr(3)];
        cache.remove_failed(&mut candidates);

        assert_eq!(candidates, vec![addr(1), addr(3)]);
    }

    #[test]
    fn test_concurrent_adds() {
        let cache = Arc::new(FailedRelayCache::new(Duration::from_secs(60)));
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    for j in 0..16u8 {
                        cache.add(&addr(i * 16 + j));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 128);
        assert!((0..128u8).all(|i| cache.contains(&addr(i))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_follows_runtime_clock() {
        let cache = FailedRelayCache::new(Duration::from_secs(60));
        cache.add(&addr(1));

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(cache.contains(&addr(1)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!cache.contains(&addr(1)));
        assert!(cache.is_empty());
    }
}
