//! Scoped write overlay.
//!
//! Writes made through a [`Session`] are visible to reads through the same
//! session and invisible to the shared cache until [`Session::commit`].

use crate::tiered::TieredCache;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use strata_core::{CacheEntry, CacheKey, FastFingerprint, SharedEntry};
use tracing::debug;

/// Uncommitted writes layered over a [`TieredCache`].
pub struct Session<'a> {
    cache: &'a TieredCache,
    overlay: Mutex<AHashMap<CacheKey, SharedEntry>>,
}

impl std::fmt::Debug for Session<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("pending", &self.pending_len())
            .finish_non_exhaustive()
    }
}

impl<'a> Session<'a> {
    pub(crate) fn new(cache: &'a TieredCache) -> Self {
        Self {
            cache,
            overlay: Mutex::new(AHashMap::new()),
        }
    }

    /// Read through the overlay, then the shared cache.
    #[must_use]
    pub fn get(&self, key: &CacheKey, fresh: Option<&FastFingerprint>) -> Option<SharedEntry> {
        if let Some(entry) = self.overlay.lock().get(key) {
            return Some(Arc::clone(entry));
        }
        self.cache.get(key, fresh)
    }

    /// Stage `entry`. A later write to the same key replaces it.
    pub fn set(&self, entry: CacheEntry) -> SharedEntry {
        let entry = entry.shared();
        self.overlay
            .lock()
            .insert(entry.key().clone(), Arc::clone(&entry));
        entry
    }

    /// Number of staged writes.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.overlay.lock().len()
    }

    /// Publish every staged write to the shared cache. Returns how many were
    /// published.
    pub fn commit(self) -> usize {
        let staged = std::mem::take(&mut *self.overlay.lock());
        let count = staged.len();
        for entry in staged.into_values() {
            self.cache.set_shared(entry);
        }
        debug!(count, "session committed");
        count
    }

    /// Drop every staged write. Returns how many were dropped.
    pub fn discard(self) -> usize {
        std::mem::take(&mut *self.overlay.lock()).len()
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        let pending = self.overlay.get_mut().len();
        if pending > 0 {
            debug!(pending, "session dropped with uncommitted writes");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{CacheConfig, TieredCache};
    use pretty_assertions::assert_eq;
    use strata_core::{ArtifactId, CacheEntry, CacheKey, ContentHash};

    fn entry(payload: &[u8]) -> CacheEntry {
        let hash = ContentHash::of(payload);
        CacheEntry::new(
            CacheKey::new(ArtifactId::new("a.rs", "rust"), hash),
            payload.to_vec(),
            vec![],
            hash,
        )
    }

    #[test]
    fn test_overlay_is_private_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::open(dir.path(), CacheConfig::default()).unwrap();
        let session = cache.session();
        let staged = session.set(entry(b"draft"));

        assert!(session.get(staged.key(), None).is_some());
        assert!(cache.get(staged.key(), None).is_none());

        assert_eq!(session.commit(), 1);
        assert!(cache.get(staged.key(), None).is_some());
    }

    #[test]
    fn test_discard() {
        let dir = tempfile::tempdir().unwrap();
        let cache = TieredCache::open(dir.path(), CacheConfig::default()).unwrap();
        let session = cache.session();
        let staged = session.set(entry(b"draft"));
        assert_eq!(session.pending_len(), 1);
        assert_eq!(session.discard(), 1);
        assert!(cache.get(staged.key(), None).is_none());
    }
}
