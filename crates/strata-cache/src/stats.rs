//! Cache statistics tracking.

use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Cache tier an entry was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// In-process map.
    Hot,
    /// Bounded adaptive cache.
    Warm,
    /// Persistent object store.
    Cold,
    /// Content-addressed store.
    Dedup,
}

impl Tier {
    /// Lowercase tier name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
            Self::Dedup => "dedup",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Atomic cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hot_hits: AtomicU64,
    warm_hits: AtomicU64,
    cold_hits: AtomicU64,
    dedup_hits: AtomicU64,
    misses: AtomicU64,
    /// Hits answered by the metadata fast path.
    fast_path_hits: AtomicU64,
    /// Promotions of a lower-tier hit into faster tiers.
    promotions: AtomicU64,
    durable_writes: AtomicU64,
    /// Durable writes that failed and were swallowed.
    durable_failures: AtomicU64,
    /// Durable writes dropped because the queue was full.
    durable_drops: AtomicU64,
    tombstones: AtomicU64,
    invalidations: AtomicU64,
    /// Bytes handed to the durable writer.
    bytes_written: AtomicU64,
    start_time: RwLock<Option<Instant>>,
}

impl CacheStats {
    /// Create new stats tracker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: RwLock::new(Some(Instant::now())),
            ..Default::default()
        }
    }

    /// Record a hit in `tier`.
    pub fn record_hit(&self, tier: Tier) {
        let counter = match tier {
            Tier::Hot => &self.hot_hits,
            Tier::Warm => &self.warm_hits,
            Tier::Cold => &self.cold_hits,
            Tier::Dedup => &self.dedup_hits,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a full miss.
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a fast-path hit.
    pub fn record_fast_path_hit(&self) {
        self.fast_path_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a promotion.
    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed durable write of `bytes`.
    pub fn record_durable_write(&self, bytes: u64) {
        self.durable_writes.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record a swallowed durable-write failure.
    pub fn record_durable_failure(&self) {
        self.durable_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a durable write dropped under backpressure.
    pub fn record_durable_drop(&self) {
        self.durable_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a cold-tier tombstone.
    pub fn record_tombstone(&self) {
        self.tombstones.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an invalidation.
    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot. Counters owned by individual tiers are passed in.
    #[must_use]
    pub fn snapshot(&self, tiers: TierCounters) -> CacheStatsSnapshot {
        let hot_hits = self.hot_hits.load(Ordering::Relaxed);
        let warm_hits = self.warm_hits.load(Ordering::Relaxed);
        let cold_hits = self.cold_hits.load(Ordering::Relaxed);
        let dedup_hits = self.dedup_hits.load(Ordering::Relaxed);
        let hits = hot_hits + warm_hits + cold_hits + dedup_hits;
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        let uptime = self
            .start_time
            .read()
            .map(|t| t.elapsed())
            .unwrap_or_default();

        CacheStatsSnapshot {
            hits,
            misses,
            hit_rate,
            hot_hits,
            warm_hits,
            cold_hits,
            dedup_hits,
            fast_path_hits: self.fast_path_hits.load(Ordering::Relaxed),
            filter_rejections: tiers.filter_rejections,
            promotions: self.promotions.load(Ordering::Relaxed),
            durable_writes: self.durable_writes.load(Ordering::Relaxed),
            durable_failures: self.durable_failures.load(Ordering::Relaxed),
            durable_drops: self.durable_drops.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            tombstones: self.tombstones.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            corruptions: tiers.corruptions,
            warm_evictions: tiers.warm_evictions,
            warm_expirations: tiers.warm_expirations,
            hot_entries: tiers.hot_entries,
            warm_entries: tiers.warm_entries,
            warm_weighted_bytes: tiers.warm_weighted_bytes,
            pending_writes: tiers.pending_writes,
            uptime,
        }
    }

    /// Reset all statistics.
    pub fn reset(&self) {
        for counter in [
            &self.hot_hits,
            &self.warm_hits,
            &self.cold_hits,
            &self.dedup_hits,
            &self.misses,
            &self.fast_path_hits,
            &self.promotions,
            &self.durable_writes,
            &self.durable_failures,
            &self.durable_drops,
            &self.tombstones,
            &self.invalidations,
            &self.bytes_written,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.start_time.write() = Some(Instant::now());
    }
}

/// Counters kept by the tiers themselves, merged into a snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct TierCounters {
    /// Lookups rejected by the hot-tier filter.
    pub filter_rejections: u64,
    /// Corrupt objects removed by the cold tier and dedup store.
    pub corruptions: u64,
    /// Entries evicted from the warm tier under capacity pressure.
    pub warm_evictions: u64,
    /// Entries dropped from the warm tier by its time-to-live.
    pub warm_expirations: u64,
    /// Entries resident in the hot tier.
    pub hot_entries: u64,
    /// Entries resident in the warm tier.
    pub warm_entries: u64,
    /// Weighted size of the warm tier.
    pub warm_weighted_bytes: u64,
    /// Durable writes queued but not yet processed.
    pub pending_writes: u64,
}

/// Snapshot of cache statistics.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStatsSnapshot {
    /// Hits across all tiers.
    pub hits: u64,
    /// Full misses.
    pub misses: u64,
    /// Hit rate (0.0 - 1.0).
    pub hit_rate: f64,
    /// Hot tier hits.
    pub hot_hits: u64,
    /// Warm tier hits.
    pub warm_hits: u64,
    /// Cold tier hits.
    pub cold_hits: u64,
    /// Dedup store hits.
    pub dedup_hits: u64,
    /// Hits answered by the metadata fast path.
    pub fast_path_hits: u64,
    /// Lookups rejected by the hot-tier filter.
    pub filter_rejections: u64,
    /// Lower-tier hits promoted upward.
    pub promotions: u64,
    /// Completed durable writes.
    pub durable_writes: u64,
    /// Swallowed durable-write failures.
    pub durable_failures: u64,
    /// Durable writes dropped under backpressure.
    pub durable_drops: u64,
    /// Bytes durably written.
    pub bytes_written: u64,
    /// Keys tombstoned in the cold tier.
    pub tombstones: u64,
    /// Invalidations.
    pub invalidations: u64,
    /// Corrupt objects removed.
    pub corruptions: u64,
    /// Warm tier capacity evictions.
    pub warm_evictions: u64,
    /// Warm tier time-to-live expirations.
    pub warm_expirations: u64,
    /// Hot tier entries.
    pub hot_entries: u64,
    /// Warm tier entries.
    pub warm_entries: u64,
    /// Warm tier weighted size in bytes.
    pub warm_weighted_bytes: u64,
    /// Durable writes still queued.
    pub pending_writes: u64,
    /// Time since creation or last reset.
    #[serde(with = "duration_secs")]
    pub uptime: Duration,
}

impl CacheStatsSnapshot {
    /// Format statistics as a human-readable string.
    #[must_use]
    pub fn format_summary(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!(
            "Hit Rate: {:.1}% ({} hits, {} misses)",
            self.hit_rate * 100.0,
            self.hits,
            self.misses
        ));
        lines.push(format!(
            "  hot: {} ({} fast path), warm: {}, cold: {}, dedup: {}",
            self.hot_hits, self.fast_path_hits, self.warm_hits, self.cold_hits, self.dedup_hits
        ));
        lines.push(format!(
            "Resident: {} hot, {} warm ({})",
            self.hot_entries,
            self.warm_entries,
            format_bytes(self.warm_weighted_bytes)
        ));
        lines.push(format!(
            "Durable: {} writes ({}), {} failed, {} dropped, {} pending",
            self.durable_writes,
            format_bytes(self.bytes_written),
            self.durable_failures,
            self.durable_drops,
            self.pending_writes
        ));
        lines.push(format!(
            "Evictions: {}, Expirations: {}, Invalidations: {}, Promotions: {}",
            self.warm_evictions, self.warm_expirations, self.invalidations, self.promotions
        ));

        if self.corruptions > 0 {
            lines.push(format!("Corrupt objects removed: {}", self.corruptions));
        }
        if self.filter_rejections > 0 {
            lines.push(format!("Filter rejections: {}", self.filter_rejections));
        }

        lines.push(format!("Uptime: {:.1}s", self.uptime.as_secs_f64()));

        lines.join("\n")
    }
}

/// Human-readable byte count.
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}

mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }
}
