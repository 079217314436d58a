//! Bounded, time-expiring holding area for tree snapshots.

use crate::pattern_tree::PatternTree;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct StagedSnapshot {
    tree: Arc<PatternTree>,
    staged_at: Instant,
}

impl StagedSnapshot {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.staged_at.elapsed() > ttl
    }
}

/// LRU of snapshots keyed by storage key. Not synchronized; the miner
/// wraps it in its own mutex.
pub struct SnapshotCache {
    entries: LruCache<String, StagedSnapshot>,
    ttl: Duration,
}

impl SnapshotCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
            ttl,
        }
    }

    pub fn put(&mut self, key: impl Into<String>, tree: Arc<PatternTree>) {
        self.entries.put(
            key.into(),
            StagedSnapshot {
                tree,
                staged_at: Instant::now(),
            },
        );
    }

    /// Live snapshot under `key`. Expired entries are evicted on access.
    pub fn get(&mut self, key: &str) -> Option<Arc<PatternTree>> {
        let expired = self.entries.peek(key).map(|s| s.is_expired(self.ttl))?;
        if expired {
            self.entries.pop(key);
            return None;
        }
        self.entries.get(key).map(|s| Arc::clone(&s.tree))
    }

    /// All live snapshots, most recently used first.
    pub fn live_entries(&mut self) -> Vec<(String, Arc<PatternTree>)> {
        self.purge_expired();
        self.entries
            .iter()
            .map(|(key, s)| (key.clone(), Arc::clone(&s.tree)))
            .collect()
    }

    pub fn purge_expired(&mut self) {
        let ttl = self.ttl;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, s)| s.is_expired(ttl))
            .map(|(key, _)| key.clone())
            .collect();
        for key in expired {
            self.entries.pop(&key);
        }
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
}
