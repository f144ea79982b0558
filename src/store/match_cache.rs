//! Match Cache (SPEC_FULL §4.13): short-TTL front for Match Store
//! reads, keyed on the ordered `(code_a, code_b)` pair. Grounded on
//! `intelligent_cache_manager.py`'s gzip+pickle match cache; this is a
//! from-scratch Rust system, so cached values are plain in-process
//! clones rather than a serialized blob.

use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use crate::models::ProductMatch;

const DEFAULT_CAPACITY: usize = 10_000;

pub trait MatchCache: Send + Sync {
    fn get(&self, code_a: &str, code_b: &str) -> Option<ProductMatch>;
    fn put(&self, m: ProductMatch);
    fn invalidate(&self, code_a: &str, code_b: &str);
}

struct CachedEntry {
    value: ProductMatch,
    inserted_at: Instant,
}

pub struct InMemoryMatchCache {
    ttl: Duration,
    entries: Mutex<LruCache<(String, String), CachedEntry>>,
}

impl InMemoryMatchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(LruCache::new(std::num::NonZeroUsize::new(DEFAULT_CAPACITY).unwrap())),
        }
    }

    fn key(code_a: &str, code_b: &str) -> (String, String) {
        if code_a < code_b {
            (code_a.to_string(), code_b.to_string())
        } else {
            (code_b.to_string(), code_a.to_string())
        }
    }
}

impl MatchCache for InMemoryMatchCache {
    fn get(&self, code_a: &str, code_b: &str) -> Option<ProductMatch> {
        let key = Self::key(code_a, code_b);
        let mut entries = self.entries.lock();
        let expired = match entries.get(&key) {
            Some(entry) => entry.inserted_at.elapsed() >= self.ttl,
            None => return None,
        };
        if expired {
            entries.pop(&key);
            return None;
        }
        entries.get(&key).map(|e| e.value.clone())
    }

    fn put(&self, m: ProductMatch) {
        let key = Self::key(&m.code_a, &m.code_b);
        self.entries.lock().put(
            key,
            CachedEntry {
                value: m,
                inserted_at: Instant::now(),
            },
        );
    }

    fn invalidate(&self, code_a: &str, code_b: &str) {
        let key = Self::key(code_a, code_b);
        self.entries.lock().pop(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MatchConfidence, MatchType, SimilarityFeatures};

    fn sample(a: &str, b: &str) -> ProductMatch {
        ProductMatch::ordered(
            a.to_string(),
            b.to_string(),
            0.9,
            MatchConfidence::High,
            MatchType::Similar,
            SimilarityFeatures::default(),
            None,
        )
    }

    #[test]
    fn put_then_get_regardless_of_pair_order() {
        let cache = InMemoryMatchCache::new(Duration::from_secs(60));
        cache.put(sample("FAL0000001", "RIP0000002"));
        assert!(cache.get("FAL0000001", "RIP0000002").is_some());
        assert!(cache.get("RIP0000002", "FAL0000001").is_some());
    }

    #[test]
    fn entries_expire_after_ttl() {
        let cache = InMemoryMatchCache::new(Duration::from_millis(1));
        cache.put(sample("FAL0000001", "RIP0000002"));
        std::thread::sleep(Duration::from_millis(20));
        assert!(cache.get("FAL0000001", "RIP0000002").is_none());
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = InMemoryMatchCache::new(Duration::from_secs(60));
        cache.put(sample("FAL0000001", "RIP0000002"));
        cache.invalidate("FAL0000001", "RIP0000002");
        assert!(cache.get("FAL0000001", "RIP0000002").is_none());
    }
}
