//! Bounded in-memory record cache with TTL.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use super::record::ProofRecord;

#[derive(Debug, Clone)]
struct CacheEntry {
    record: ProofRecord,
    /// Insertion order.
    seq: u64,
    expires_at: Instant,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Cache in front of the durable backend.
///
/// Holds at most `capacity` entries; inserting into a full cache drops
/// stale entries first, then the oldest one.
pub struct RecordCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    next_seq: AtomicU64,
    capacity: usize,
    ttl: Duration,
}

impl RecordCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            capacity,
            ttl,
        }
    }

    /// Fresh entry for `key`.
    pub fn get(&self, key: &str) -> Option<ProofRecord> {
        let entries = self.entries.read().ok()?;
        let entry = entries.get(key)?;
        if entry.is_fresh(Instant::now()) {
            trace!(key, "Cache: hit");
            Some(entry.record.clone())
        } else {
            trace!(key, "Cache: stale");
            None
        }
    }

    /// Insert or replace `key`.
    pub fn insert(&self, key: &str, record: ProofRecord) {
        if self.capacity == 0 {
            return;
        }
        let Ok(mut entries) = self.entries.write() else {
            warn!("Cache: lock poisoned, not caching");
            return;
        };

        let now = Instant::now();
        if !entries.contains_key(key) && entries.len() >= self.capacity {
            entries.retain(|_, e| e.is_fresh(now));
            if entries.len() >= self.capacity {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, e)| e.seq)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key.to_string(),
            CacheEntry {
                record,
                seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                expires_at: now + self.ttl,
            },
        );
    }

    /// Drop `key`.
    pub fn remove(&self, key: &str) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(key);
        }
    }

    /// Drop every entry whose record matches `predicate`. Returns the count.
    pub fn remove_where(&self, predicate: impl Fn(&ProofRecord) -> bool) -> usize {
        let Ok(mut entries) = self.entries.write() else {
            return 0;
        };
        let before = entries.len();
        entries.retain(|_, e| !predicate(&e.record));
        before - entries.len()
    }

    /// Number of entries, fresh or not.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
