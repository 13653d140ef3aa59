//! Filled-document cache
//!
//! `fill_w9` stores its output here so `preview_w9` and `deliver_w9` can refer
//! to it by key instead of shipping the PDF back and forth.

use crate::delivery::FormSummary;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// One filled W-9 and what delivery needs to know about it
#[derive(Debug, Clone)]
pub struct StoredFill {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub display_name: String,
    /// PII-free copy of the record the PDF was filled from
    pub summary: FormSummary,
}

struct CacheInner {
    lru: LruCache<String, Arc<StoredFill>>,
    total_bytes: usize,
}

/// LRU of filled documents bounded by entry count and total PDF bytes
pub struct FillCache {
    inner: Mutex<CacheInner>,
    max_bytes: usize,
}

impl FillCache {
    pub fn new(capacity: usize, max_bytes: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(CacheInner {
                lru: LruCache::new(capacity),
                total_bytes: 0,
            }),
            max_bytes,
        }
    }

    /// Store a fill under a fresh key. Returns `None` when the document alone
    /// is larger than the byte budget.
    pub fn insert(&self, fill: StoredFill) -> Option<String> {
        let size = fill.bytes.len();
        if size > self.max_bytes {
            tracing::warn!(size, max = self.max_bytes, "Filled PDF too large to cache");
            return None;
        }

        let mut inner = self.inner.lock();
        let key = loop {
            let candidate = uuid::Uuid::new_v4().to_string();
            if !inner.lru.contains(&candidate) {
                break candidate;
            }
        };

        while inner.total_bytes + size > self.max_bytes {
            match inner.lru.pop_lru() {
                Some((evicted, old)) => {
                    tracing::debug!(key = %evicted, "Evicted cached fill");
                    inner.total_bytes = inner.total_bytes.saturating_sub(old.bytes.len());
                }
                None => break,
            }
        }

        // Count-based eviction from `push` must be accounted for too
        if let Some((_, old)) = inner.lru.push(key.clone(), Arc::new(fill)) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.bytes.len());
        }
        inner.total_bytes += size;
        Some(key)
    }

    pub fn get(&self, key: &str) -> Option<Arc<StoredFill>> {
        self.inner.lock().lru.get(key).cloned()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().lru.contains(key)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<StoredFill>> {
        let mut inner = self.inner.lock();
        let removed = inner.lru.pop(key)?;
        inner.total_bytes = inner.total_bytes.saturating_sub(removed.bytes.len());
        Some(removed)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().lru.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().lru.is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.inner.lock().total_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(size: usize) -> StoredFill {
        StoredFill {
            bytes: vec![0u8; size],
            filename: "W9_Pat_Doe_2024-01-01.pdf".to_string(),
            display_name: "Pat Doe".to_string(),
            summary: FormSummary::default(),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let cache = FillCache::new(10, 1024);
        assert!(cache.is_empty());

        let key = cache.insert(fill(3)).unwrap();
        assert_eq!(key.len(), 36);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.total_bytes(), 3);

        let stored = cache.get(&key).unwrap();
        assert_eq!(stored.filename, "W9_Pat_Doe_2024-01-01.pdf");
        assert!(!cache.contains("missing"));
    }

    #[test]
    fn test_keys_are_unique() {
        let cache = FillCache::new(10, 1024);
        let a = cache.insert(fill(1)).unwrap();
        let b = cache.insert(fill(1)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_count_eviction_tracks_bytes() {
        let cache = FillCache::new(2, 1024);
        let first = cache.insert(fill(10)).unwrap();
        cache.insert(fill(20)).unwrap();
        cache.insert(fill(30)).unwrap();

        assert!(!cache.contains(&first));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.total_bytes(), 50);
    }

    #[test]
    fn test_byte_budget_eviction() {
        let cache = FillCache::new(10, 100);
        let first = cache.insert(fill(30)).unwrap();
        let second = cache.insert(fill(30)).unwrap();
        cache.insert(fill(30)).unwrap();
        assert_eq!(cache.total_bytes(), 90);

        cache.insert(fill(30)).unwrap();
        assert!(!cache.contains(&first));
        assert!(cache.contains(&second));
        assert_eq!(cache.total_bytes(), 90);
    }

    #[test]
    fn test_oversized_fill_rejected() {
        let cache = FillCache::new(10, 50);
        assert!(cache.insert(fill(100)).is_none());
        assert!(cache.is_empty());
        assert_eq!(cache.total_bytes(), 0);
    }

    #[test]
    fn test_remove_releases_bytes() {
        let cache = FillCache::new(10, 1024);
        let key = cache.insert(fill(50)).unwrap();
        assert!(cache.remove(&key).is_some());
        assert!(cache.remove(&key).is_none());
        assert_eq!(cache.total_bytes(), 0);
    }
}
