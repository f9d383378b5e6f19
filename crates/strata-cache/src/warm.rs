//! Warm tier: bounded, adaptive in-memory cache backed by moka.
//!
//! moka's TinyLFU admission plus LRU eviction keeps both recently and
//! frequently used entries under pressure. Capacity is enforced in bytes;
//! the entry cap is folded into the weigher by charging every entry at least
//! `max_bytes / max_entries`. Entries are `Arc`s, so eviction never frees an
//! entry a reader still holds.

use moka::notification::RemovalCause;
use moka::sync::Cache;
use std::collections::HashSet;
use std::hash::BuildHasher;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use strata_core::{ArtifactId, CacheKey, SharedEntry};
use tracing::debug;

/// Adaptive in-memory cache.
pub struct WarmTier {
    cache: Cache<CacheKey, SharedEntry>,
    max_entries: u64,
    max_bytes: u64,
    evictions: Arc<AtomicU64>,
    expirations: Arc<AtomicU64>,
}

impl std::fmt::Debug for WarmTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WarmTier")
            .field("max_entries", &self.max_entries)
            .field("max_bytes", &self.max_bytes)
            .field("weighted_size", &self.cache.weighted_size())
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl WarmTier {
    /// Create a warm tier bounded by `max_entries` and `max_bytes`, expiring
    /// entries `ttl` after insertion.
    #[must_use]
    pub fn new(max_entries: u64, max_bytes: u64, ttl: Duration) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let expirations = Arc::new(AtomicU64::new(0));
        let listener_evictions = Arc::clone(&evictions);
        let listener_expirations = Arc::clone(&expirations);

        let min_weight = max_bytes.div_ceil(max_entries.max(1));
        let cache = Cache::builder()
            .max_capacity(max_bytes)
            .weigher(move |_key: &CacheKey, entry: &SharedEntry| -> u32 {
                let weight = (entry.weight() as u64).max(min_weight);
                weight.try_into().unwrap_or(u32::MAX)
            })
            .time_to_live(ttl)
            .eviction_listener(move |key: Arc<CacheKey>, _entry, cause| match cause {
                RemovalCause::Size => {
                    listener_evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "warm tier evicted entry");
                }
                RemovalCause::Expired => {
                    listener_expirations.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, "warm tier entry expired");
                }
                _ => {}
            })
            .build();

        Self {
            cache,
            max_entries,
            max_bytes,
            evictions,
            expirations,
        }
    }

    /// Look up `key`.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<SharedEntry> {
        let entry = self.cache.get(key)?;
        entry.touch();
        Some(entry)
    }

    /// Insert an entry, weighted by [`strata_core::CacheEntry::weight`].
    pub fn insert(&self, entry: SharedEntry) {
        self.cache.insert(entry.key().clone(), entry);
    }

    /// Remove `key`.
    pub fn remove(&self, key: &CacheKey) {
        self.cache.invalidate(key);
    }

    /// Drop every entry whose artifact is not in `live`.
    pub fn purge_orphans<S: BuildHasher>(&self, live: &HashSet<ArtifactId, S>) -> usize {
        let orphans: Vec<Arc<CacheKey>> = self
            .cache
            .iter()
            .filter(|(key, _)| !live.contains(&key.id))
            .map(|(key, _)| key)
            .collect();
        for key in &orphans {
            self.cache.invalidate(key.as_ref());
        }
        orphans.len()
    }

    /// Drop everything.
    pub fn clear(&self) {
        self.cache.invalidate_all();
    }

    /// Approximate number of entries.
    #[must_use]
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Approximate weighted size in bytes.
    #[must_use]
    pub fn weighted_size(&self) -> u64 {
        self.cache.weighted_size()
    }

    /// Apply pending evictions and expirations now.
    pub fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks();
    }

    /// Entries evicted under capacity pressure.
    #[must_use]
    pub fn eviction_count(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Entries removed by the time-to-live.
    #[must_use]
    pub fn expiration_count(&self) -> u64 {
        self.expirations.load(Ordering::Relaxed)
    }

    /// Zero the eviction and expiration counters.
    pub fn reset_counters(&self) {
        self.evictions.store(0, Ordering::Relaxed);
        self.expirations.store(0, Ordering::Relaxed);
    }
}
