//! Cold tier: persistent, content-addressed object store.
//!
//! ```text
//! <root>/objects/<aa>/<checksum>.art   one envelope per distinct artifact
//! <root>/index.redb                    CacheKey -> checksum, size, created-at
//! ```
//!
//! Objects are written before their index row, so a row never points at a
//! file that was not fully written. Reads verify the checksum; a corrupt
//! object is deleted together with every row pointing at it and reported as
//! a miss.

use crate::codec::{self, StoredArtifact};
use crate::index::{CacheIndex, IndexRecord};
use ahash::AHashSet;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};
use strata_core::{CacheEntry, CacheKey, ColdLocation, ContentHash, Error, Result, SharedEntry};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Stray temp files younger than this may belong to an in-flight write.
const STALE_TEMP_AGE: Duration = Duration::from_secs(3600);

/// Outcome of [`ColdTier::gc`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Tombstoned keys dropped from the index.
    pub tombstones_removed: usize,
    /// Object files deleted.
    pub objects_removed: usize,
    /// Bytes freed.
    pub bytes_freed: u64,
}

impl GcReport {
    /// Sum two reports.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            tombstones_removed: self.tombstones_removed + other.tombstones_removed,
            objects_removed: self.objects_removed + other.objects_removed,
            bytes_freed: self.bytes_freed + other.bytes_freed,
        }
    }
}

/// Outcome of a full verification scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    /// Objects checked.
    pub checked: usize,
    /// Objects that failed validation and were removed.
    pub corrupt: usize,
    /// Index rows whose object file was missing.
    pub missing: usize,
}

impl VerifyReport {
    /// Sum two reports.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            checked: self.checked + other.checked,
            corrupt: self.corrupt + other.corrupt,
            missing: self.missing + other.missing,
        }
    }

    /// Whether nothing was wrong.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.corrupt == 0 && self.missing == 0
    }
}

/// Reads an object file, distinguishing the ways it can be unusable.
pub(crate) enum ObjectRead {
    Valid(StoredArtifact, ContentHash),
    Missing,
    Corrupt(Error),
}

pub(crate) fn read_object(path: &Path) -> Result<ObjectRead> {
    let map = match codec::map_object(path) {
        Ok(Some(map)) => map,
        Ok(None) => {
            return Ok(ObjectRead::Corrupt(Error::Corruption {
                path: path.to_path_buf(),
                expected: "non-empty object".to_string(),
                actual: "empty file".to_string(),
            }));
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ObjectRead::Missing),
        Err(e) => return Err(Error::storage(path, e)),
    };
    match codec::decode(&map, path) {
        Ok((artifact, checksum)) => Ok(ObjectRead::Valid(artifact, checksum)),
        Err(e) => Ok(ObjectRead::Corrupt(e)),
    }
}

/// Persistent object store plus index.
#[derive(Debug)]
pub struct ColdTier {
    objects: PathBuf,
    index: CacheIndex,
    corruptions: AtomicU64,
}

impl ColdTier {
    /// Open or create the store under `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let objects = root.join("objects");
        std::fs::create_dir_all(&objects).map_err(|e| Error::storage(&objects, e))?;
        let index = CacheIndex::open(&root.join("index.redb"))?;
        Ok(Self {
            objects,
            index,
            corruptions: AtomicU64::new(0),
        })
    }

    fn object_path(&self, checksum: &ContentHash) -> PathBuf {
        self.objects.join(codec::object_relative_path(checksum))
    }

    /// Durably store `entry`.
    ///
    /// An existing object with the same checksum is reused only if it still
    /// validates; otherwise it is replaced.
    pub fn set(&self, entry: &CacheEntry) -> Result<ColdLocation> {
        let (bytes, checksum) = codec::encode(&StoredArtifact::from_entry(entry))?;
        let path = self.object_path(&checksum);
        if !self.holds_valid_object(&path, &checksum)? {
            codec::write_atomic(&path, &bytes).map_err(|e| Error::storage(&path, e))?;
        }
        let size = bytes.len() as u64;
        self.index.insert(
            entry.key(),
            IndexRecord {
                checksum,
                size,
                created_at: entry.created_at(),
            },
        )?;
        debug!(key = %entry.key(), checksum = %checksum.short(), size, "stored object");
        Ok(ColdLocation { checksum, size })
    }

    fn holds_valid_object(&self, path: &Path, checksum: &ContentHash) -> Result<bool> {
        match read_object(path)? {
            ObjectRead::Valid(_, found) if found == *checksum => Ok(true),
            ObjectRead::Missing => Ok(false),
            ObjectRead::Valid(_, found) => {
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path.display(), found = %found.short(), "replacing mismatched object");
                Ok(false)
            }
            ObjectRead::Corrupt(err) => {
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path.display(), error = %err, "replacing corrupt object");
                Ok(false)
            }
        }
    }

    /// Load the entry stored under `key`.
    ///
    /// Returns `Ok(None)` for unknown keys and for objects that turn out to
    /// be missing or corrupt; the latter are cleaned up first.
    pub fn get(&self, key: &CacheKey) -> Result<Option<SharedEntry>> {
        let Some(record) = self.index.get(key)? else {
            return Ok(None);
        };
        let path = self.object_path(&record.checksum);
        match read_object(&path)? {
            ObjectRead::Valid(artifact, checksum) if checksum == record.checksum => {
                let entry = artifact.into_entry(key.clone(), record.created_at);
                entry.set_cold_location(ColdLocation {
                    checksum,
                    size: record.size,
                });
                Ok(Some(entry.shared()))
            }
            ObjectRead::Valid(_, checksum) => {
                self.discard_corrupt(
                    &path,
                    &record.checksum,
                    &Error::Corruption {
                        path: path.clone(),
                        expected: record.checksum.to_hex(),
                        actual: checksum.to_hex(),
                    },
                )?;
                Ok(None)
            }
            ObjectRead::Missing => {
                warn!(key = %key, path = %path.display(), "indexed object is missing");
                self.index.remove(key)?;
                Ok(None)
            }
            ObjectRead::Corrupt(err) => {
                self.discard_corrupt(&path, &record.checksum, &err)?;
                Ok(None)
            }
        }
    }

    fn discard_corrupt(&self, path: &Path, checksum: &ContentHash, err: &Error) -> Result<()> {
        self.corruptions.fetch_add(1, Ordering::Relaxed);
        warn!(path = %path.display(), error = %err, "removing corrupt cache object");
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::storage(path, e)),
        }
        self.index.remove_by_checksum(checksum)?;
        Ok(())
    }

    /// Whether `key` has a live index row.
    pub fn contains(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.index.get(key)?.is_some())
    }

    /// Mark `key` for removal at the next [`ColdTier::gc`]. The key also
    /// stays marked invalidated until it is stored again.
    pub fn tombstone(&self, key: &CacheKey) -> Result<bool> {
        self.index.tombstone(key)
    }

    /// Whether `key` was invalidated and not stored since.
    pub fn is_invalidated(&self, key: &CacheKey) -> Result<bool> {
        self.index.is_invalidated(key)
    }

    /// Forget invalidation marks for fingerprints that are no longer stored
    /// anywhere they could be served from.
    pub fn prune_invalidated(&self, stored: &AHashSet<ContentHash>) -> Result<usize> {
        self.index.prune_invalidated(stored)
    }

    /// Fingerprints of the live keys.
    pub fn live_fingerprints(&self) -> Result<AHashSet<ContentHash>> {
        Ok(self
            .index
            .entries()?
            .into_iter()
            .map(|(key, _)| key.fingerprint)
            .collect())
    }

    /// Drop tombstoned keys and delete objects no key references.
    ///
    /// Run with the durable writer drained; an object written but not yet
    /// indexed would look unreferenced.
    pub fn gc(&self) -> Result<GcReport> {
        let mut report = GcReport {
            tombstones_removed: self.index.take_tombstones()?.len(),
            ..GcReport::default()
        };
        let referenced = self.index.referenced_checksums()?;
        let now = SystemTime::now();

        for file in WalkDir::new(&self.objects)
            .min_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = file.path();
            let metadata = match file.metadata() {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unreadable object");
                    continue;
                }
            };
            let remove = match codec::checksum_from_file_name(path) {
                Some(checksum) => !referenced.contains(&checksum),
                None => metadata
                    .modified()
                    .ok()
                    .and_then(|m| now.duration_since(m).ok())
                    .is_some_and(|age| age >= STALE_TEMP_AGE),
            };
            if remove {
                std::fs::remove_file(path).map_err(|e| Error::storage(path, e))?;
                report.objects_removed += 1;
                report.bytes_freed += metadata.len();
            }
        }

        info!(
            tombstones = report.tombstones_removed,
            objects = report.objects_removed,
            bytes = report.bytes_freed,
            "cold tier gc finished"
        );
        Ok(report)
    }

    /// Validate every indexed object, removing corrupt ones and rows whose
    /// object is missing.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let mut seen = AHashSet::new();
        for (key, record) in self.index.entries()? {
            if !seen.insert(record.checksum) {
                continue;
            }
            report.checked += 1;
            let path = self.object_path(&record.checksum);
            match read_object(&path)? {
                ObjectRead::Valid(_, checksum) if checksum == record.checksum => {}
                ObjectRead::Valid(_, checksum) => {
                    report.corrupt += 1;
                    self.discard_corrupt(
                        &path,
                        &record.checksum,
                        &Error::Corruption {
                            path: path.clone(),
                            expected: record.checksum.to_hex(),
                            actual: checksum.to_hex(),
                        },
                    )?;
                }
                ObjectRead::Missing => {
                    report.missing += 1;
                    warn!(key = %key, path = %path.display(), "indexed object is missing");
                    self.index.remove_by_checksum(&record.checksum)?;
                }
                ObjectRead::Corrupt(err) => {
                    report.corrupt += 1;
                    self.discard_corrupt(&path, &record.checksum, &err)?;
                }
            }
        }
        info!(
            checked = report.checked,
            corrupt = report.corrupt,
            missing = report.missing,
            "cold tier verified"
        );
        Ok(report)
    }

    /// Remove every object and index row.
    pub fn clear(&self) -> Result<()> {
        self.index.clear()?;
        match std::fs::remove_dir_all(&self.objects) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::storage(&self.objects, e)),
        }
        std::fs::create_dir_all(&self.objects).map_err(|e| Error::storage(&self.objects, e))?;
        info!(path = %self.objects.display(), "cold tier cleared");
        Ok(())
    }

    /// Live keys.
    pub fn keys(&self) -> Result<Vec<CacheKey>> {
        Ok(self.index.entries()?.into_iter().map(|(k, _)| k).collect())
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<u64> {
        self.index.len()
    }

    /// Whether there are no live keys.
    pub fn is_empty(&self) -> Result<bool> {
        self.index.is_empty()
    }

    /// Keys awaiting gc.
    pub fn tombstone_count(&self) -> Result<u64> {
        self.index.tombstone_count()
    }

    /// Bytes used by object files.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        directory_size(&self.objects)
    }

    /// Corrupt objects removed or replaced since open or the last reset.
    #[must_use]
    pub fn corruption_count(&self) -> u64 {
        self.corruptions.load(Ordering::Relaxed)
    }

    /// Zero the corruption counter.
    pub fn reset_counters(&self) {
        self.corruptions.store(0, Ordering::Relaxed);
    }

    /// Path of the object stored for `key`, if indexed.
    pub fn object_path_for(&self, key: &CacheKey) -> Result<Option<PathBuf>> {
        Ok(self
            .index
            .get(key)?
            .map(|record| self.object_path(&record.checksum)))
    }
}

/// Total size of the regular files under `dir`.
pub(crate) fn directory_size(dir: &Path) -> u64 {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_core::ArtifactId;

    fn entry(name: &str, payload: &[u8]) -> CacheEntry {
        let id = ArtifactId::new(name, "rust");
        let hash = ContentHash::of(payload);
        CacheEntry::new(
            CacheKey::new(id, hash),
            payload.to_vec(),
            vec![ArtifactId::new("dep.rs", "rust")],
            hash,
        )
    }

    fn open() -> (tempfile::TempDir, ColdTier) {
        let dir = tempfile::tempdir().unwrap();
        let cold = ColdTier::open(dir.path()).unwrap();
        (dir, cold)
    }

    #[test]
    fn test_set_get() {
        let (_dir, cold) = open();
        let e = entry("a.rs", b"payload a");
        let location = cold.set(&e).unwrap();

        let got = cold.get(e.key()).unwrap().unwrap();
        assert_eq!(*got, e);
        assert_eq!(got.cold_location(), Some(&location));
        assert_eq!(got.created_at(), e.created_at());
    }

    #[test]
    fn test_unknown_key_is_none() {
        let (_dir, cold) = open();
        assert!(cold.get(entry("a.rs", b"x").key()).unwrap().is_none());
    }

    #[test]
    fn test_identical_artifacts_share_object() {
        let (_dir, cold) = open();
        let a = entry("a.rs", b"same");
        let b = a.rekeyed(CacheKey::new(ArtifactId::new("b.rs", "rust"), *a.source_hash()));
        let la = cold.set(&a).unwrap();
        let lb = cold.set(&b).unwrap();
        assert_eq!(la.checksum, lb.checksum);
        assert_eq!(cold.len().unwrap(), 2);
        assert_eq!(cold.disk_usage(), la.size);
    }

    #[test]
    fn test_corrupt_object_is_removed() {
        let (_dir, cold) = open();
        let e = entry("a.rs", b"payload a");
        cold.set(&e).unwrap();
        let path = cold.object_path_for(e.key()).unwrap().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0x55;
        std::fs::write(&path, bytes).unwrap();

        assert!(cold.get(e.key()).unwrap().is_none());
        assert!(!path.exists());
        assert_eq!(cold.corruption_count(), 1);
        assert!(!cold.contains(e.key()).unwrap());
    }

    #[test]
    fn test_missing_object_drops_row() {
        let (_dir, cold) = open();
        let e = entry("a.rs", b"payload a");
        cold.set(&e).unwrap();
        let path = cold.object_path_for(e.key()).unwrap().unwrap();
        std::fs::remove_file(path).unwrap();

        assert!(cold.get(e.key()).unwrap().is_none());
        assert!(!cold.contains(e.key()).unwrap());
        assert_eq!(cold.corruption_count(), 0);
    }

    #[test]
    fn test_gc_removes_tombstoned_objects() {
        let (_dir, cold) = open();
        let keep = entry("keep.rs", b"keep");
        let stale = entry("stale.rs", b"stale");
        cold.set(&keep).unwrap();
        let dropped = cold.set(&stale).unwrap();

        assert!(cold.tombstone(stale.key()).unwrap());
        assert!(cold.get(stale.key()).unwrap().is_none());

        let report = cold.gc().unwrap();
        assert_eq!(report.tombstones_removed, 1);
        assert_eq!(report.objects_removed, 1);
        assert_eq!(report.bytes_freed, dropped.size);
        assert!(cold.get(keep.key()).unwrap().is_some());
    }

    #[test]
    fn test_gc_keeps_objects_shared_with_live_keys() {
        let (_dir, cold) = open();
        let a = entry("a.rs", b"same");
        let b = a.rekeyed(CacheKey::new(ArtifactId::new("b.rs", "rust"), *a.source_hash()));
        cold.set(&a).unwrap();
        cold.set(&b).unwrap();
        cold.tombstone(a.key()).unwrap();

        let report = cold.gc().unwrap();
        assert_eq!(report.objects_removed, 0);
        assert!(cold.get(b.key()).unwrap().is_some());
    }

    #[test]
    fn test_verify_reports_corruption() {
        let (_dir, cold) = open();
        let good = entry("good.rs", b"good");
        let bad = entry("bad.rs", b"bad");
        cold.set(&good).unwrap();
        cold.set(&bad).unwrap();
        let path = cold.object_path_for(bad.key()).unwrap().unwrap();
        std::fs::write(&path, b"garbage").unwrap();

        let report = cold.verify().unwrap();
        assert_eq!(report.checked, 2);
        assert_eq!(report.corrupt, 1);
        assert!(!report.is_clean());
        assert!(cold.verify().unwrap().is_clean());
    }

    #[test]
    fn test_set_replaces_damaged_object() {
        let (_dir, cold) = open();
        let e = entry("a.rs", b"payload a");
        cold.set(&e).unwrap();
        let path = cold.object_path_for(e.key()).unwrap().unwrap();
        std::fs::write(&path, b"garbage").unwrap();

        // Storing the same content again must not trust the damaged file.
        cold.set(&e).unwrap();
        assert_eq!(*cold.get(e.key()).unwrap().unwrap(), e);
        assert_eq!(cold.corruption_count(), 1);
        assert!(cold.verify().unwrap().is_clean());
    }

    #[test]
    fn test_tombstoned_key_stays_invalidated_after_gc() {
        let (_dir, cold) = open();
        let e = entry("a.rs", b"payload a");
        cold.set(&e).unwrap();
        cold.tombstone(e.key()).unwrap();
        cold.gc().unwrap();
        assert!(cold.is_invalidated(e.key()).unwrap());
        assert!(cold.live_fingerprints().unwrap().is_empty());

        cold.set(&e).unwrap();
        assert!(!cold.is_invalidated(e.key()).unwrap());
        assert!(cold.live_fingerprints().unwrap().contains(&e.key().fingerprint));
    }

    #[test]
    fn test_reset_counters() {
        let (_dir, cold) = open();
        let e = entry("a.rs", b"payload a");
        cold.set(&e).unwrap();
        let path = cold.object_path_for(e.key()).unwrap().unwrap();
        std::fs::write(&path, b"garbage").unwrap();
        assert!(cold.get(e.key()).unwrap().is_none());
        assert_eq!(cold.corruption_count(), 1);
        cold.reset_counters();
        assert_eq!(cold.corruption_count(), 0);
    }

    #[test]
    fn test_clear() {
        let (_dir, cold) = open();
        cold.set(&entry("a.rs", b"a")).unwrap();
        cold.clear().unwrap();
        assert!(cold.is_empty().unwrap());
        assert_eq!(cold.disk_usage(), 0);
    }
}
