//! Hot tier: every artifact touched in this process.
//!
//! A sharded concurrent map keyed by [`CacheKey`], fronted by an
//! [`AtomicBloomFilter`] so definite misses never touch a shard lock. No
//! eviction; entries leave only through [`HotTier::remove`],
//! [`HotTier::purge_orphans`] or [`HotTier::clear`].

use crate::bloom::AtomicBloomFilter;
use dashmap::DashMap;
use std::collections::HashSet;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use strata_core::{ArtifactId, CacheKey, FastFingerprint, SharedEntry, SourceStamp};
use tracing::trace;

/// Metadata an entry was built from, for skipping the content hash.
#[derive(Debug, Clone)]
struct FastRecord {
    stamp: SourceStamp,
    entry: SharedEntry,
}

/// In-process artifact map.
#[derive(Debug)]
pub struct HotTier {
    entries: DashMap<CacheKey, SharedEntry, ahash::RandomState>,
    filter: AtomicBloomFilter,
    fast_path: DashMap<ArtifactId, FastRecord, ahash::RandomState>,
    racy_window: Duration,
    filter_rejections: AtomicU64,
}

impl HotTier {
    /// Create an empty hot tier.
    #[must_use]
    pub fn new(filter_capacity: usize, filter_fp_rate: f64, racy_window: Duration) -> Self {
        Self {
            entries: DashMap::with_hasher(ahash::RandomState::new()),
            filter: AtomicBloomFilter::new(filter_capacity, filter_fp_rate),
            fast_path: DashMap::with_hasher(ahash::RandomState::new()),
            racy_window,
            filter_rejections: AtomicU64::new(0),
        }
    }

    /// Look up `key`. The filter is consulted first.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<SharedEntry> {
        if !self.filter.may_contain(key) {
            self.filter_rejections.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        let entry = self.entries.get(key).map(|e| e.value().clone())?;
        entry.touch();
        Some(entry)
    }

    /// Return the entry last built from a file with exactly this `mtime` and
    /// `size`, without hashing the file.
    ///
    /// Records whose mtime was less than the racy window old when observed
    /// never match: a same-size rewrite within one timestamp tick would be
    /// indistinguishable.
    #[must_use]
    pub fn check_fast_path(
        &self,
        id: &ArtifactId,
        mtime: SystemTime,
        size: u64,
    ) -> Option<SharedEntry> {
        let record = self.fast_path.get(id)?;
        let probe = FastFingerprint::new(mtime, size);
        if record.stamp.fast != probe {
            return None;
        }
        if record.stamp.is_racy(self.racy_window) {
            trace!(id = %id, "fast path skipped: racy timestamp");
            return None;
        }
        let entry = record.entry.clone();
        drop(record);
        entry.touch();
        Some(entry)
    }

    /// Insert an entry. Entries carrying a source stamp also become the
    /// fast-path answer for their artifact.
    pub fn insert(&self, entry: SharedEntry) {
        let key = entry.key().clone();
        self.filter.insert(&key);
        if let Some(stamp) = entry.source_stamp() {
            self.fast_path.insert(
                key.id.clone(),
                FastRecord {
                    stamp: *stamp,
                    entry: entry.clone(),
                },
            );
        }
        self.entries.insert(key, entry);
    }

    /// Remove `key`, and its fast-path record if it points at this key.
    pub fn remove(&self, key: &CacheKey) -> Option<SharedEntry> {
        self.fast_path
            .remove_if(&key.id, |_, record| record.entry.key() == key);
        self.entries.remove(key).map(|(_, entry)| entry)
    }

    /// Drop every entry whose artifact is not in `live`. Returns the number of
    /// entries removed.
    ///
    /// Filter bits stay set; a purged key costs one map probe on lookup.
    pub fn purge_orphans<S: BuildHasher>(&self, live: &HashSet<ArtifactId, S>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, _| live.contains(&key.id));
        self.fast_path.retain(|id, _| live.contains(id));
        before.saturating_sub(self.entries.len())
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the tier is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lookups rejected by the filter.
    #[must_use]
    pub fn filter_rejections(&self) -> u64 {
        self.filter_rejections.load(Ordering::Relaxed)
    }

    /// Zero the rejection counter.
    pub fn reset_counters(&self) {
        self.filter_rejections.store(0, Ordering::Relaxed);
    }

    /// Drop everything, including filter state.
    pub fn clear(&self) {
        self.entries.clear();
        self.fast_path.clear();
        self.filter.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::UNIX_EPOCH;
    use strata_core::{CacheEntry, ContentHash};

    fn tier() -> HotTier {
        HotTier::new(1024, 0.01, Duration::from_secs(2))
    }

    fn entry(path: &str, content: &[u8]) -> CacheEntry {
        let id = ArtifactId::new(path, "rust");
        let hash = ContentHash::of(content);
        CacheEntry::new(CacheKey::new(id, hash), content.to_vec(), vec![], hash)
    }

    fn stamp(mtime_secs: u64, size: u64, observed_secs: u64) -> SourceStamp {
        SourceStamp::new(
            FastFingerprint::new(UNIX_EPOCH + Duration::from_secs(mtime_secs), size),
            UNIX_EPOCH + Duration::from_secs(observed_secs),
        )
    }

    #[test]
    fn test_insert_get() {
        let hot = tier();
        let e = entry("a.rs", b"a").shared();
        hot.insert(e.clone());
        let got = hot.get(e.key()).unwrap();
        assert!(Arc::ptr_eq(&got, &e));
        assert_eq!(got.access_count(), 1);
    }

    #[test]
    fn test_filter_rejects_unknown_keys() {
        let hot = tier();
        let missing = entry("b.rs", b"b");
        assert!(hot.get(missing.key()).is_none());
        assert_eq!(hot.filter_rejections(), 1);
        hot.reset_counters();
        assert_eq!(hot.filter_rejections(), 0);
    }

    #[test]
    fn test_fast_path_requires_exact_metadata() {
        let hot = tier();
        let e = entry("a.rs", b"abc")
            .with_source_stamp(stamp(1_000, 3, 1_010))
            .shared();
        hot.insert(e);

        let id = ArtifactId::new("a.rs", "rust");
        let mtime = UNIX_EPOCH + Duration::from_secs(1_000);
        assert!(hot.check_fast_path(&id, mtime, 3).is_some());
        assert!(hot.check_fast_path(&id, mtime, 4).is_none());
        assert!(
            hot.check_fast_path(&id, mtime + Duration::from_secs(1), 3)
                .is_none()
        );
    }

    #[test]
    fn test_fast_path_ignores_racy_records() {
        let hot = tier();
        // Observed one second after the mtime: a same-size rewrite in the same
        // second would not change the metadata.
        let e = entry("a.rs", b"abc")
            .with_source_stamp(stamp(1_000, 3, 1_001))
            .shared();
        hot.insert(e.clone());

        let id = ArtifactId::new("a.rs", "rust");
        let mtime = UNIX_EPOCH + Duration::from_secs(1_000);
        assert!(hot.check_fast_path(&id, mtime, 3).is_none());
        // The entry itself is still reachable by key.
        assert!(hot.get(e.key()).is_some());
    }

    #[test]
    fn test_remove_clears_matching_fast_record() {
        let hot = tier();
        let e = entry("a.rs", b"abc")
            .with_source_stamp(stamp(1_000, 3, 1_010))
            .shared();
        hot.insert(e.clone());
        hot.remove(e.key());

        let mtime = UNIX_EPOCH + Duration::from_secs(1_000);
        assert!(hot.check_fast_path(&e.key().id, mtime, 3).is_none());
        assert!(hot.get(e.key()).is_none());
    }

    #[test]
    fn test_purge_orphans() {
        let hot = tier();
        hot.insert(entry("keep.rs", b"1").shared());
        hot.insert(entry("gone.rs", b"2").shared());
        hot.insert(entry("gone.rs", b"3").shared());

        let live: HashSet<ArtifactId> = [ArtifactId::new("keep.rs", "rust")].into();
        assert_eq!(hot.purge_orphans(&live), 2);
        assert_eq!(hot.len(), 1);
    }

    #[test]
    fn test_concurrent_insert_and_get() {
        let hot = Arc::new(tier());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let hot = Arc::clone(&hot);
                std::thread::spawn(move || {
                    for i in 0..200 {
                        let e = entry(&format!("f{t}_{i}.rs"), format!("{t}{i}").as_bytes())
                            .shared();
                        hot.insert(e.clone());
                        assert!(hot.get(e.key()).is_some());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(hot.len(), 800);
    }
}
