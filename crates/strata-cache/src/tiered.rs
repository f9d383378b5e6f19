//! Multi-tier artifact cache.
//!
//! This is the main cache interface:
//! - Hot tier: lock-free in-process map with a metadata fast path
//! - Warm tier: bounded adaptive cache (moka)
//! - Cold tier: checksummed objects on disk plus a redb index
//! - Dedup store: content-addressed copies shared across artifact ids
//!
//! Lookups probe Hot, Warm, Cold, Dedup in that order. A hit below Hot is
//! followed by an explicit [`TieredCache::backfill`] into the faster tiers.
//! `set` writes Hot and Warm synchronously and hands the durable write to a
//! background thread; [`TieredCache::flush`] waits for it.

use crate::cold::{ColdTier, GcReport, VerifyReport};
use crate::config::CacheConfig;
use crate::dedup::DedupStore;
use crate::hot::HotTier;
use crate::session::Session;
use crate::stats::{CacheStats, CacheStatsSnapshot, Tier, TierCounters};
use crate::warm::WarmTier;
use crate::writer::DurableWriter;
use ahash::AHashSet;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use std::hash::BuildHasher;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use strata_core::{
    ArtifactId, CacheEntry, CacheKey, Error, FastFingerprint, Result, SharedEntry,
};
use tracing::{debug, info, warn};

/// On-disk totals for the cache root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    /// Live keys in the cold index.
    pub cold_entries: u64,
    /// Keys awaiting gc.
    pub tombstones: u64,
    /// Bytes used by cold objects.
    pub cold_bytes: u64,
    /// Objects in the dedup store.
    pub dedup_objects: u64,
    /// Bytes used by the dedup store.
    pub dedup_bytes: u64,
}

/// Tiered artifact cache.
pub struct TieredCache {
    hot: HotTier,
    warm: WarmTier,
    cold: Arc<ColdTier>,
    dedup: Option<Arc<DedupStore>>,
    writer: DurableWriter,
    /// Keys invalidated since their last `set` whose tombstone may still be
    /// queued. Once processed, the index keeps the mark durably.
    invalidated: DashMap<CacheKey, (), ahash::RandomState>,
    stats: Arc<CacheStats>,
    root: PathBuf,
    config: CacheConfig,
}

impl std::fmt::Debug for TieredCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredCache")
            .field("root", &self.root)
            .field("hot_entries", &self.hot.len())
            .field("warm", &self.warm)
            .field("dedup", &self.dedup.is_some())
            .field("writer", &self.writer)
            .finish()
    }
}

impl TieredCache {
    /// Open the cache at the configured root, or the platform cache dir.
    ///
    /// # Errors
    /// Returns error if the root cannot be resolved or opened.
    pub fn new(config: CacheConfig) -> Result<Self> {
        let root = config.resolve_root()?;
        Self::open(root, config)
    }

    /// Open the cache at `root`.
    ///
    /// Only one `TieredCache` per root may be open at a time; the index file
    /// is locked while open.
    ///
    /// # Errors
    /// Returns error if the directory, index or writer thread cannot be
    /// created.
    pub fn open(root: impl Into<PathBuf>, config: CacheConfig) -> Result<Self> {
        let root = root.into();
        let config = config.validate()?;
        std::fs::create_dir_all(&root).map_err(|e| Error::storage(&root, e))?;

        let stats = Arc::new(CacheStats::new());
        let cold = Arc::new(ColdTier::open(&root)?);
        let dedup = if config.dedup_enabled {
            Some(Arc::new(DedupStore::open(root.join("cas"))?))
        } else {
            None
        };
        let writer = DurableWriter::spawn(
            Arc::clone(&cold),
            dedup.clone(),
            Arc::clone(&stats),
            config.write_queue_capacity,
            config.backpressure,
        )?;

        info!(
            root = %root.display(),
            dedup = config.dedup_enabled,
            backpressure = config.backpressure.as_str(),
            "opened tiered cache"
        );

        Ok(Self {
            hot: HotTier::new(
                config.filter_capacity,
                config.filter_fp_rate,
                config.racy_window,
            ),
            warm: WarmTier::new(
                config.warm_max_entries,
                config.warm_max_bytes,
                config.warm_ttl,
            ),
            cold,
            dedup,
            writer,
            invalidated: DashMap::with_hasher(ahash::RandomState::new()),
            stats,
            root,
            config,
        })
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Where the dependency graph snapshot for this cache lives.
    #[must_use]
    pub fn graph_path(&self) -> PathBuf {
        self.root.join("graph.bin")
    }

    /// Look up `key`.
    ///
    /// When `fresh` is the current metadata of the artifact's source, the
    /// hot tier's fast path is tried first.
    #[must_use]
    pub fn get(&self, key: &CacheKey, fresh: Option<&FastFingerprint>) -> Option<SharedEntry> {
        self.get_with_tier(key, fresh).map(|(entry, _)| entry)
    }

    /// Look up `key`, reporting which tier answered.
    #[must_use]
    pub fn get_with_tier(
        &self,
        key: &CacheKey,
        fresh: Option<&FastFingerprint>,
    ) -> Option<(SharedEntry, Tier)> {
        if let Some(fast) = fresh {
            if let Some(entry) = self.probe_fast(&key.id, fast) {
                if entry.key() == key {
                    self.stats.record_fast_path_hit();
                    self.stats.record_hit(Tier::Hot);
                    return Some((entry, Tier::Hot));
                }
            }
        }

        if let Some(entry) = self.hot.get(key) {
            self.stats.record_hit(Tier::Hot);
            return Some((entry, Tier::Hot));
        }

        if let Some(entry) = self.warm.get(key) {
            self.stats.record_hit(Tier::Warm);
            self.backfill(&entry, Tier::Warm);
            return Some((entry, Tier::Warm));
        }

        if !self.invalidated.contains_key(key) {
            if let Some(found) = self.probe_durable(key) {
                return Some(found);
            }
        }

        self.stats.record_miss();
        None
    }

    fn probe_durable(&self, key: &CacheKey) -> Option<(SharedEntry, Tier)> {
        match self.cold.get(key) {
            Ok(Some(entry)) => {
                self.stats.record_hit(Tier::Cold);
                self.backfill(&entry, Tier::Cold);
                return Some((entry, Tier::Cold));
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cold tier read failed, treating as miss"),
        }

        let dedup = self.dedup.as_ref()?;
        // The dedup store is shared by fingerprint, so it would still hold
        // content for a key invalidated in an earlier run or before a gc.
        match self.cold.is_invalidated(key) {
            Ok(false) => {}
            Ok(true) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "index read failed, treating as miss");
                return None;
            }
        }
        match dedup.get(key) {
            Ok(Some(entry)) => {
                self.stats.record_hit(Tier::Dedup);
                self.backfill(&entry, Tier::Dedup);
                Some((entry, Tier::Dedup))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key = %key, error = %e, "dedup read failed, treating as miss");
                None
            }
        }
    }

    /// Copy an entry found in `found_in` into every faster tier, and into the
    /// durable tiers it is missing from.
    ///
    /// Idempotent: repeating it re-inserts the same `Arc`.
    pub fn backfill(&self, entry: &SharedEntry, found_in: Tier) {
        match found_in {
            Tier::Hot => return,
            Tier::Warm => self.hot.insert(Arc::clone(entry)),
            Tier::Cold | Tier::Dedup => {
                self.hot.insert(Arc::clone(entry));
                self.warm.insert(Arc::clone(entry));
                // A cold hit already carries its location; the writer then
                // only fills the dedup store.
                if found_in == Tier::Dedup || self.dedup.is_some() {
                    self.writer.enqueue_write(Arc::clone(entry));
                }
            }
        }
        self.stats.record_promotion();
        debug!(key = %entry.key(), from = %found_in, "promoted entry");
    }

    /// Hot-tier fast path by metadata alone.
    #[must_use]
    pub fn probe_fast(&self, id: &ArtifactId, fast: &FastFingerprint) -> Option<SharedEntry> {
        self.hot.check_fast_path(id, fast.mtime(), fast.size)
    }

    /// Insert a fully built entry.
    ///
    /// Hot and Warm are updated before this returns; the durable write is
    /// queued and subject to the backpressure policy.
    pub fn set(&self, entry: CacheEntry) -> SharedEntry {
        let entry = entry.shared();
        self.set_shared(Arc::clone(&entry));
        entry
    }

    /// [`TieredCache::set`] for an entry that is already shared.
    pub fn set_shared(&self, entry: SharedEntry) {
        self.invalidated.remove(entry.key());
        self.hot.insert(Arc::clone(&entry));
        self.warm.insert(Arc::clone(&entry));
        self.writer.enqueue_write(entry);
    }

    /// Remove `key` from memory and tombstone it on disk.
    pub fn invalidate(&self, key: &CacheKey) {
        self.hot.remove(key);
        self.warm.remove(key);
        self.invalidated.insert(key.clone(), ());
        self.writer.enqueue_tombstone(key.clone());
        self.stats.record_invalidation();
        debug!(key = %key, "invalidated");
    }

    /// Drop every entry whose artifact is not in `live`, tombstoning its
    /// durable copies. Returns the number of keys removed.
    ///
    /// # Errors
    /// Returns error if the cold index cannot be read.
    pub fn purge_orphans<S: BuildHasher>(&self, live: &HashSet<ArtifactId, S>) -> Result<usize> {
        let mut removed = self.hot.purge_orphans(live) + self.warm.purge_orphans(live);
        for key in self.cold.keys()? {
            if !live.contains(&key.id) {
                self.invalidate(&key);
                removed += 1;
            }
        }
        if removed > 0 {
            debug!(removed, "purged orphaned artifacts");
        }
        Ok(removed)
    }

    /// Block until every queued durable write has completed.
    ///
    /// # Errors
    /// Returns error if the writer thread has stopped.
    pub fn flush(&self) -> Result<()> {
        self.writer.flush()
    }

    /// Open a session with its own uncommitted overlay.
    #[must_use]
    pub fn session(&self) -> Session<'_> {
        Session::new(self)
    }

    /// Statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.warm.run_pending_tasks();
        let dedup_corruptions = self.dedup.as_ref().map_or(0, |d| d.corruption_count());
        self.stats.snapshot(TierCounters {
            filter_rejections: self.hot.filter_rejections(),
            corruptions: self.cold.corruption_count() + dedup_corruptions,
            warm_evictions: self.warm.eviction_count(),
            warm_expirations: self.warm.expiration_count(),
            hot_entries: self.hot.len() as u64,
            warm_entries: self.warm.entry_count(),
            warm_weighted_bytes: self.warm.weighted_size(),
            pending_writes: self.writer.pending(),
        })
    }

    /// On-disk totals.
    ///
    /// # Errors
    /// Returns error if the cold index cannot be read.
    pub fn disk_usage(&self) -> Result<DiskUsage> {
        Ok(DiskUsage {
            cold_entries: self.cold.len()?,
            tombstones: self.cold.tombstone_count()?,
            cold_bytes: self.cold.disk_usage(),
            dedup_objects: self.dedup.as_ref().map_or(0, |d| d.len() as u64),
            dedup_bytes: self.dedup.as_ref().map_or(0, |d| d.disk_usage()),
        })
    }

    /// Flush, then drop tombstoned keys and unreferenced objects in the cold
    /// tier and the dedup store.
    ///
    /// # Errors
    /// Returns error if the writer has stopped or storage fails.
    pub fn gc(&self) -> Result<GcReport> {
        self.flush()?;
        let mut report = self.cold.gc()?;
        let stored = match &self.dedup {
            Some(dedup) => {
                report = report.merge(dedup.gc(&self.cold.live_fingerprints()?)?);
                dedup.fingerprints()
            }
            None => {
                report = report.merge(self.drop_disabled_dedup_store()?);
                AHashSet::new()
            }
        };
        // Marks recorded on disk replace the in-memory ones; a key whose
        // tombstone is still queued keeps its in-memory mark.
        self.invalidated
            .retain(|key, _| !matches!(self.cold.is_invalidated(key), Ok(true)));
        let pruned = self.cold.prune_invalidated(&stored)?;
        debug!(pruned, "pruned invalidation marks");
        Ok(report)
    }

    /// Remove a `cas/` directory left by a run with dedup enabled.
    fn drop_disabled_dedup_store(&self) -> Result<GcReport> {
        let path = self.root.join("cas");
        if !path.exists() {
            return Ok(GcReport::default());
        }
        let stale = DedupStore::open(&path)?;
        let report = GcReport {
            objects_removed: stale.len(),
            bytes_freed: stale.disk_usage(),
            ..GcReport::default()
        };
        std::fs::remove_dir_all(&path).map_err(|e| Error::storage(&path, e))?;
        info!(path = %path.display(), "removed disabled dedup store");
        Ok(report)
    }

    /// Flush, then validate every durable object.
    ///
    /// # Errors
    /// Returns error if the writer has stopped or storage fails.
    pub fn verify(&self) -> Result<VerifyReport> {
        self.flush()?;
        let mut report = self.cold.verify()?;
        if let Some(dedup) = &self.dedup {
            report = report.merge(dedup.verify()?);
        }
        Ok(report)
    }

    /// Flush, then empty every tier.
    ///
    /// # Errors
    /// Returns error if the writer has stopped or storage fails.
    pub fn clear(&self) -> Result<()> {
        self.flush()?;
        self.hot.clear();
        self.warm.clear();
        self.invalidated.clear();
        self.cold.clear()?;
        self.cold.reset_counters();
        if let Some(dedup) = &self.dedup {
            dedup.clear()?;
            dedup.reset_counters();
        }
        self.warm.run_pending_tasks();
        self.warm.reset_counters();
        self.hot.reset_counters();
        self.stats.reset();
        info!(root = %self.root.display(), "cache cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Backpressure;
    use pretty_assertions::assert_eq;
    use strata_core::ContentHash;

    fn open(dir: &Path) -> TieredCache {
        TieredCache::open(dir, CacheConfig::default()).unwrap()
    }

    fn entry(name: &str, payload: &[u8]) -> CacheEntry {
        let hash = ContentHash::of(payload);
        CacheEntry::new(
            CacheKey::new(ArtifactId::new(name, "rust"), hash),
            payload.to_vec(),
            vec![],
            hash,
        )
    }

    #[test]
    fn test_set_then_get_is_hot() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let e = cache.set(entry("a.rs", b"a"));
        let (got, tier) = cache.get_with_tier(e.key(), None).unwrap();
        assert!(Arc::ptr_eq(&got, &e));
        assert_eq!(tier, Tier::Hot);
    }

    #[test]
    fn test_miss_is_counted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        assert!(cache.get(entry("a.rs", b"a").key(), None).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_invalidate_hides_durable_copies() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let e = cache.set(entry("a.rs", b"a"));
        cache.flush().unwrap();
        cache.invalidate(e.key());
        assert!(cache.get(e.key(), None).is_none());
        cache.flush().unwrap();
        assert_eq!(cache.disk_usage().unwrap().tombstones, 1);

        // Setting the key again revives it.
        cache.set(entry("a.rs", b"a"));
        assert!(cache.get(e.key(), None).is_some());
    }

    #[test]
    fn test_dedup_hit_backfills_cold() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let a = cache.set(entry("a.rs", b"shared"));
        cache.flush().unwrap();

        // Same fingerprint under another id: only the dedup store has it.
        let other = CacheKey::new(ArtifactId::new("b.rs", "rust"), a.key().fingerprint);
        let (got, tier) = cache.get_with_tier(&other, None).unwrap();
        assert_eq!(tier, Tier::Dedup);
        assert_eq!(got.payload(), a.payload());

        cache.flush().unwrap();
        assert_eq!(cache.disk_usage().unwrap().cold_entries, 2);
        assert_eq!(cache.get_with_tier(&other, None).unwrap().1, Tier::Hot);
    }

    #[test]
    fn test_dedup_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig::builder()
            .dedup_enabled(false)
            .backpressure(Backpressure::Block)
            .build()
            .unwrap();
        let cache = TieredCache::open(dir.path(), config).unwrap();
        let a = cache.set(entry("a.rs", b"shared"));
        cache.flush().unwrap();
        let other = CacheKey::new(ArtifactId::new("b.rs", "rust"), a.key().fingerprint);
        assert!(cache.get(&other, None).is_none());
        assert!(!dir.path().join("cas").exists());
    }

    #[test]
    fn test_purge_orphans_tombstones_cold() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        cache.set(entry("keep.rs", b"keep"));
        let gone = cache.set(entry("gone.rs", b"gone"));
        cache.flush().unwrap();

        let live: HashSet<ArtifactId> = [ArtifactId::new("keep.rs", "rust")].into();
        assert!(cache.purge_orphans(&live).unwrap() >= 2);
        assert!(cache.get(gone.key(), None).is_none());
        cache.flush().unwrap();
        assert_eq!(cache.disk_usage().unwrap().cold_entries, 1);
    }

    #[test]
    fn test_clear() {
        let dir = tempfile::tempdir().unwrap();
        let cache = open(dir.path());
        let e = cache.set(entry("a.rs", b"a"));
        cache.clear().unwrap();
        assert!(cache.get(e.key(), None).is_none());
        assert_eq!(cache.disk_usage().unwrap(), DiskUsage::default());
    }
}
