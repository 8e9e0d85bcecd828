//! Module: Cache
//! But: Bounded address → balance cache in front of the oracle.
//!
//! *Signed: kryon.kas*

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;

use crate::derive::Address;

pub const DEFAULT_CACHE_SIZE: usize = 5_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CacheEntry {
    pub balance: f64,
    pub checked_at: Instant,
}

/// LRU cache of oracle answers. Never re-validates age.
pub struct AddressCache {
    entries: LruCache<Address, CacheEntry>,
    hits: u64,
    misses: u64,
}

impl AddressCache {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            hits: 0,
            misses: 0,
        }
    }

    /// Cached balance, promoting the entry to most recently used.
    pub fn lookup(&mut self, address: &Address) -> Option<f64> {
        match self.entries.get(address) {
            Some(entry) => {
                self.hits += 1;
                Some(entry.balance)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Inserts or refreshes; evicts the least recently used entry when full.
    pub fn insert(&mut self, address: Address, balance: f64) {
        self.entries.put(
            address,
            CacheEntry {
                balance,
                checked_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    /// (hits, misses) since creation.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }

    /// Percentage of lookups answered from the cache.
    pub fn hit_rate(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return 0.0;
        }
        self.hits as f64 * 100.0 / lookups as f64
    }

    /// Age of the least recently used entry, the next one to be evicted.
    pub fn oldest_age(&self, now: Instant) -> Option<Duration> {
        self.entries
            .peek_lru()
            .map(|(_, entry)| now.saturating_duration_since(entry.checked_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::derive::Currency;

    fn addr(value: &str) -> Address {
        Address::new(Currency::Btc, value)
    }

    fn cache(capacity: usize) -> AddressCache {
        AddressCache::new(NonZeroUsize::new(capacity).unwrap())
    }

    #[test]
    fn test_evicts_oldest_at_capacity() {
        let mut cache = cache(2);
        cache.insert(addr("A"), 1.0);
        cache.insert(addr("B"), 2.0);
        cache.insert(addr("C"), 3.0);

        assert_eq!(cache.lookup(&addr("A")), None);
        assert_eq!(cache.lookup(&addr("C")), Some(3.0));
        assert_eq!(cache.lookup(&addr("B")), Some(2.0));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_lookup_refreshes_recency() {
        let mut cache = cache(2);
        cache.insert(addr("A"), 1.0);
        cache.insert(addr("B"), 2.0);
        assert_eq!(cache.lookup(&addr("A")), Some(1.0));
        cache.insert(addr("C"), 3.0);

        assert_eq!(cache.lookup(&addr("B")), None);
        assert_eq!(cache.lookup(&addr("A")), Some(1.0));
    }

    #[test]
    fn test_never_exceeds_capacity() {
        for capacity in [1usize, 2, 7, 64] {
            let mut cache = cache(capacity);
            for i in 0..(capacity * 5) {
                // Re-inserting earlier keys mixes refreshes with fresh inserts.
                cache.insert(addr(&format!("{}", i % (capacity * 2 + 1))), i as f64);
                assert!(cache.len() <= capacity);
            }
            assert_eq!(cache.capacity(), capacity);
        }
    }

    #[test]
    fn test_currency_is_part_of_key() {
        let mut cache = cache(4);
        cache.insert(Address::new(Currency::Btc, "02aa"), 1.5);
        assert_eq!(cache.lookup(&Address::new(Currency::Eth, "02aa")), None);
        assert_eq!(cache.lookup(&Address::new(Currency::Btc, "02aa")), Some(1.5));
        assert_eq!(cache.stats(), (1, 1));
        assert_eq!(cache.hit_rate(), 50.0);
    }

    #[test]
    fn test_oldest_age_tracks_lru_entry() {
        let mut cache = cache(2);
        assert_eq!(cache.oldest_age(Instant::now()), None);

        cache.insert(addr("A"), 1.0);
        let later = Instant::now() + Duration::from_secs(90);
        cache.insert(addr("B"), 2.0);
        let age = cache.oldest_age(later).unwrap();
        assert!(age >= Duration::from_secs(90) && age < Duration::from_secs(91));

        // Touching A makes B the eviction candidate.
        cache.lookup(&addr("A"));
        assert!(cache.oldest_age(later).unwrap() < Duration::from_secs(90));
        assert_eq!(cache.hit_rate(), 100.0);
    }
}
