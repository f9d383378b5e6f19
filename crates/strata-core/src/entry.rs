//! Materialized cache entries.

use crate::fingerprint::{ContentHash, SourceStamp};
use crate::id::ArtifactId;
use crate::key::CacheKey;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// Entries are shared between tiers; promotion clones the `Arc`, never the entry.
pub type SharedEntry = Arc<CacheEntry>;

/// Fixed per-entry overhead counted towards the warm tier's weight budget.
const ENTRY_OVERHEAD: usize = 160;

/// Where the cold tier stored an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColdLocation {
    /// Checksum of the stored object; also its file name.
    pub checksum: ContentHash,
    /// Size of the stored object in bytes.
    pub size: u64,
}

/// A built artifact plus bookkeeping.
#[derive(Debug)]
pub struct CacheEntry {
    key: CacheKey,
    payload: Bytes,
    dependencies: Vec<ArtifactId>,
    source_hash: ContentHash,
    source_stamp: Option<SourceStamp>,
    created_at: u64,
    access_count: AtomicU64,
    last_access: AtomicU64,
    cold: OnceLock<ColdLocation>,
}

impl CacheEntry {
    /// Create an entry for a freshly built artifact.
    #[must_use]
    pub fn new(
        key: CacheKey,
        payload: impl Into<Bytes>,
        dependencies: Vec<ArtifactId>,
        source_hash: ContentHash,
    ) -> Self {
        let now = crate::unix_now();
        Self {
            key,
            payload: payload.into(),
            dependencies,
            source_hash,
            source_stamp: None,
            created_at: now,
            access_count: AtomicU64::new(0),
            last_access: AtomicU64::new(now),
            cold: OnceLock::new(),
        }
    }

    /// Attach the source metadata the entry was built from, enabling the
    /// hot tier's fast path.
    #[must_use]
    pub fn with_source_stamp(mut self, stamp: SourceStamp) -> Self {
        self.source_stamp = Some(stamp);
        self
    }

    /// Override the creation timestamp (used when loading from disk).
    #[must_use]
    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    /// Copy of this entry under another key, sharing the payload buffer.
    ///
    /// Used when a content-addressed hit belongs to a different artifact id.
    #[must_use]
    pub fn rekeyed(&self, key: CacheKey) -> Self {
        let mut entry = Self::new(
            key,
            self.payload.clone(),
            self.dependencies.clone(),
            self.source_hash,
        );
        entry.source_stamp = self.source_stamp;
        entry.created_at = self.created_at;
        entry
    }

    /// Wrap in an `Arc` for sharing between tiers.
    #[must_use]
    pub fn shared(self) -> SharedEntry {
        Arc::new(self)
    }

    /// Cache key.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Artifact payload.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Dependencies recorded at build time.
    #[must_use]
    pub fn dependencies(&self) -> &[ArtifactId] {
        &self.dependencies
    }

    /// Content hash of the source the artifact was built from.
    #[must_use]
    pub const fn source_hash(&self) -> &ContentHash {
        &self.source_hash
    }

    /// Source metadata observed before the build, if known.
    #[must_use]
    pub const fn source_stamp(&self) -> Option<&SourceStamp> {
        self.source_stamp.as_ref()
    }

    /// Creation time, seconds since the Unix epoch.
    #[must_use]
    pub const fn created_at(&self) -> u64 {
        self.created_at
    }

    /// Number of recorded accesses.
    #[must_use]
    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    /// Last access time, seconds since the Unix epoch.
    #[must_use]
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Record an access.
    pub fn touch(&self) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.last_access.store(crate::unix_now(), Ordering::Relaxed);
    }

    /// Estimated in-memory size in bytes.
    #[must_use]
    pub fn weight(&self) -> usize {
        let deps: usize = self
            .dependencies
            .iter()
            .map(|d| d.path().len() + d.language().len() + 48)
            .sum();
        ENTRY_OVERHEAD + self.key.id.path().len() + self.payload.len() + deps
    }

    /// Cold-tier location, once the entry has been durably written.
    #[must_use]
    pub fn cold_location(&self) -> Option<&ColdLocation> {
        self.cold.get()
    }

    /// Record the cold-tier location. Later calls are ignored.
    pub fn set_cold_location(&self, location: ColdLocation) {
        let _ = self.cold.set(location);
    }
}

impl PartialEq for CacheEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
            && self.payload == other.payload
            && self.dependencies == other.dependencies
            && self.source_hash == other.source_hash
    }
}

impl Eq for CacheEntry {}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(payload: &'static [u8]) -> CacheEntry {
        let id = ArtifactId::new("src/a.rs", "rust");
        let hash = ContentHash::of(payload);
        CacheEntry::new(CacheKey::new(id, hash), payload, vec![], hash)
    }

    #[test]
    fn test_equality_ignores_bookkeeping() {
        let a = entry(b"ir");
        let b = entry(b"ir");
        a.touch();
        a.touch();
        assert_eq!(a.access_count(), 2);
        assert_eq!(b.access_count(), 0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_weight_counts_payload() {
        let small = entry(b"x");
        let large = entry(&[0u8; 4096]);
        assert!(large.weight() >= small.weight() + 4095);
    }

    #[test]
    fn test_cold_location_is_set_once() {
        let e = entry(b"ir");
        let first = ColdLocation {
            checksum: ContentHash::of(b"1"),
            size: 1,
        };
        e.set_cold_location(first);
        e.set_cold_location(ColdLocation {
            checksum: ContentHash::of(b"2"),
            size: 2,
        });
        assert_eq!(e.cold_location(), Some(&first));
    }

    #[test]
    fn test_rekeyed_shares_payload() {
        let e = entry(b"shared ir");
        let other = CacheKey::new(ArtifactId::new("src/b.rs", "rust"), *e.source_hash());
        let copy = e.rekeyed(other.clone());
        assert_eq!(copy.key(), &other);
        assert_eq!(copy.payload().as_ptr(), e.payload().as_ptr());
    }
}
