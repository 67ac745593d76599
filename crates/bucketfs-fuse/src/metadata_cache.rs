//! In-process metadata caches (C2, §4.2): a stat cache keyed by object
//! name with a positive/negative TTL, and a process-wide type cache used
//! as a fallback to each directory's own [`crate::inode::DirState`]
//! cache. Both are byte-budgeted LRU (a `DashMap` plus an access-order
//! list), evicting oldest-touched entries once `max_size_mb` is exceeded.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use bucketfs_core::domain::ObjectRecord;
use dashmap::DashMap;

/// Rough per-entry overhead charged against the byte budget beyond the
/// variable-length name, matching the fixed fields an `ObjectRecord`
/// carries (generation, size, timestamps, etc).
const ENTRY_OVERHEAD_BYTES: u64 = 128;

enum StatEntry {
    Positive { record: ObjectRecord, inserted_at: Instant },
    Negative { inserted_at: Instant },
}

impl StatEntry {
    fn size_bytes(&self, name_len: usize) -> u64 {
        name_len as u64 + ENTRY_OVERHEAD_BYTES
    }
}

/// Stat cache (§4.2): caches both hits (`Some(record)`) and misses
/// (`None`, negative caching) so a repeated lookup of a nonexistent name
/// doesn't round-trip to the bucket every time.
pub struct StatCache {
    entries: DashMap<String, StatEntry>,
    /// Access order, most-recently-touched at the back; used for LRU
    /// eviction instead of a per-entry atomic timestamp scan.
    order: Mutex<VecDeque<String>>,
    max_size_bytes: i64,
    ttl: Duration,
    negative_ttl: Duration,
}

impl StatCache {
    pub fn new(max_size_mb: i64, ttl: Duration, negative_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_size_bytes: if max_size_mb < 0 { -1 } else { max_size_mb * 1024 * 1024 },
            ttl,
            negative_ttl,
        }
    }

    fn touch_order(&self, name: &str) {
        let mut order = self.order.lock().unwrap();
        order.retain(|n| n != name);
        order.push_back(name.to_string());
    }

    /// Records a positive stat result.
    pub fn put(&self, name: &str, record: ObjectRecord) {
        self.entries
            .insert(name.to_string(), StatEntry::Positive { record, inserted_at: Instant::now() });
        self.touch_order(name);
        self.evict_if_over_budget();
    }

    /// Records that `name` is currently absent (§4.2 negative caching).
    pub fn put_negative(&self, name: &str) {
        self.entries.insert(name.to_string(), StatEntry::Negative { inserted_at: Instant::now() });
        self.touch_order(name);
        self.evict_if_over_budget();
    }

    /// `Ok(result)` if a live cache entry exists; `Err(())` on a miss or
    /// an expired entry, signalling the caller must fetch from the
    /// bucket (§4.2's "a stale entry is exactly a cache miss").
    pub fn get(&self, name: &str) -> Result<Option<ObjectRecord>, ()> {
        let Some(entry) = self.entries.get(name) else { return Err(()) };
        match &*entry {
            StatEntry::Positive { record, inserted_at } => {
                if inserted_at.elapsed() < self.ttl {
                    Ok(Some(record.clone()))
                } else {
                    Err(())
                }
            }
            StatEntry::Negative { inserted_at } => {
                if inserted_at.elapsed() < self.negative_ttl {
                    Ok(None)
                } else {
                    Err(())
                }
            }
        }
    }

    /// Drops a cached entry, used on precondition-failure reconciliation
    /// and on any mutation of `name` (I7: eviction on precondition failure).
    pub fn invalidate(&self, name: &str) {
        self.entries.remove(name);
        self.order.lock().unwrap().retain(|n| n != name);
    }

    fn current_size(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| e.value().size_bytes(e.key().len()))
            .sum()
    }

    fn evict_if_over_budget(&self) {
        if self.max_size_bytes < 0 {
            return;
        }
        let budget = self.max_size_bytes as u64;
        while self.current_size() > budget {
            let oldest = {
                let mut order = self.order.lock().unwrap();
                order.pop_front()
            };
            match oldest {
                Some(name) => {
                    self.entries.remove(&name);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketfs_core::domain::{Generation, Metageneration, ObjectName, RecordKind};
    use chrono::Utc;
    use std::collections::HashMap;

    fn sample(name: &str) -> ObjectRecord {
        ObjectRecord {
            name: ObjectName::new(name).unwrap(),
            size: 1,
            generation: Generation(1),
            metageneration: Metageneration(1),
            content_type: None,
            updated: Utc::now(),
            crc32c: None,
            md5: None,
            metadata: HashMap::new(),
            storage_class: None,
            kind: RecordKind::Object,
        }
    }

    #[test]
    fn positive_hit_roundtrips() {
        let cache = StatCache::new(32, Duration::from_secs(60), Duration::from_secs(5));
        cache.put("a", sample("a"));
        assert_eq!(cache.get("a").unwrap().unwrap().name.as_str(), "a");
    }

    #[test]
    fn negative_hit_returns_none_not_miss() {
        let cache = StatCache::new(32, Duration::from_secs(60), Duration::from_secs(5));
        cache.put_negative("missing");
        assert_eq!(cache.get("missing"), Ok(None));
    }

    #[test]
    fn miss_on_unseen_name() {
        let cache = StatCache::new(32, Duration::from_secs(60), Duration::from_secs(5));
        assert_eq!(cache.get("nope"), Err(()));
    }

    #[test]
    fn expired_negative_entry_is_a_miss() {
        let cache = StatCache::new(32, Duration::from_secs(60), Duration::from_nanos(1));
        cache.put_negative("a");
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(cache.get("a"), Err(()));
    }

    #[test]
    fn invalidate_removes_entry() {
        let cache = StatCache::new(32, Duration::from_secs(60), Duration::from_secs(5));
        cache.put("a", sample("a"));
        cache.invalidate("a");
        assert_eq!(cache.get("a"), Err(()));
    }

    #[test]
    fn unbounded_budget_never_evicts() {
        let cache = StatCache::new(-1, Duration::from_secs(60), Duration::from_secs(5));
        for i in 0..100 {
            cache.put(&format!("obj-{i}"), sample(&format!("obj-{i}")));
        }
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn tiny_budget_evicts_oldest_first() {
        let cache = StatCache::new(0, Duration::from_secs(60), Duration::from_secs(5));
        cache.put("a", sample("a"));
        cache.put("b", sample("b"));
        assert!(cache.get("a").is_err());
        assert!(cache.len() <= 1);
    }
}
