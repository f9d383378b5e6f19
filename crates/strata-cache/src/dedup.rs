//! Content-addressed store shared by every key with the same fingerprint.
//!
//! `<root>/cas/<aa>/<fingerprint>.art`, using the cold tier's envelope. The
//! file is addressed by the key fingerprint alone, so artifacts with
//! identical content and identical dependency fingerprints are stored once
//! no matter which artifact id produced them.
//!
//! An object lives as long as some live cold-tier key carries its
//! fingerprint; [`DedupStore::gc`] deletes the rest.

use crate::codec::{self, StoredArtifact};
use crate::cold::{GcReport, ObjectRead, VerifyReport, directory_size, read_object};
use ahash::AHashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use strata_core::{CacheEntry, CacheKey, ContentHash, Error, Result, SharedEntry};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Content-addressed artifact store.
#[derive(Debug)]
pub struct DedupStore {
    root: PathBuf,
    corruptions: AtomicU64,
}

impl DedupStore {
    /// Open or create the store at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|e| Error::storage(&root, e))?;
        Ok(Self {
            root,
            corruptions: AtomicU64::new(0),
        })
    }

    fn path_for(&self, fingerprint: &ContentHash) -> PathBuf {
        self.root.join(codec::object_relative_path(fingerprint))
    }

    /// Whether content for `fingerprint` is stored.
    #[must_use]
    pub fn contains(&self, fingerprint: &ContentHash) -> bool {
        self.path_for(fingerprint).exists()
    }

    /// Load the artifact stored for `key.fingerprint`, materialized under
    /// `key`.
    pub fn get(&self, key: &CacheKey) -> Result<Option<SharedEntry>> {
        let path = self.path_for(&key.fingerprint);
        match read_object(&path)? {
            ObjectRead::Valid(artifact, checksum) => {
                let entry = artifact.into_entry(key.clone(), strata_core::unix_now());
                debug!(key = %key, checksum = %checksum.short(), "dedup hit");
                Ok(Some(entry.shared()))
            }
            ObjectRead::Missing => Ok(None),
            ObjectRead::Corrupt(err) => {
                self.discard_corrupt(&path, &err)?;
                Ok(None)
            }
        }
    }

    /// Store `entry` under its key fingerprint. Returns `false` if valid
    /// content for that fingerprint already exists; a damaged copy is
    /// replaced.
    pub fn insert(&self, entry: &CacheEntry) -> Result<bool> {
        let path = self.path_for(&entry.key().fingerprint);
        match read_object(&path)? {
            ObjectRead::Valid(..) => return Ok(false),
            ObjectRead::Missing => {}
            ObjectRead::Corrupt(err) => {
                self.corruptions.fetch_add(1, Ordering::Relaxed);
                warn!(path = %path.display(), error = %err, "replacing corrupt dedup object");
            }
        }
        let (bytes, _) = codec::encode(&StoredArtifact::from_entry(entry))?;
        codec::write_atomic(&path, &bytes).map_err(|e| Error::storage(&path, e))?;
        debug!(key = %entry.key(), size = bytes.len(), "dedup stored");
        Ok(true)
    }

    fn discard_corrupt(&self, path: &Path, err: &Error) -> Result<()> {
        self.corruptions.fetch_add(1, Ordering::Relaxed);
        warn!(path = %path.display(), error = %err, "removing corrupt dedup object");
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(path, e)),
        }
    }

    /// Validate every stored object, removing corrupt ones.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        for file in WalkDir::new(&self.root)
            .min_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = file.path();
            if codec::checksum_from_file_name(path).is_none() {
                continue;
            }
            report.checked += 1;
            if let ObjectRead::Corrupt(err) = read_object(path)? {
                report.corrupt += 1;
                self.discard_corrupt(path, &err)?;
            }
        }
        info!(checked = report.checked, corrupt = report.corrupt, "dedup store verified");
        Ok(report)
    }

    /// Delete every object whose fingerprint is not in `live`.
    ///
    /// Run with the durable writer drained.
    pub fn gc(&self, live: &AHashSet<ContentHash>) -> Result<GcReport> {
        let mut report = GcReport::default();
        for file in WalkDir::new(&self.root)
            .min_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
        {
            let path = file.path();
            let Some(fingerprint) = codec::checksum_from_file_name(path) else {
                continue;
            };
            if live.contains(&fingerprint) {
                continue;
            }
            let size = file.metadata().map(|m| m.len()).unwrap_or(0);
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(Error::storage(path, e)),
            }
            report.objects_removed += 1;
            report.bytes_freed += size;
        }
        info!(
            objects = report.objects_removed,
            bytes = report.bytes_freed,
            "dedup store gc finished"
        );
        Ok(report)
    }

    /// Fingerprints with a stored object.
    #[must_use]
    pub fn fingerprints(&self) -> AHashSet<ContentHash> {
        WalkDir::new(&self.root)
            .min_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter_map(|e| codec::checksum_from_file_name(e.path()))
            .collect()
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fingerprints().len()
    }

    /// Whether nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes used by stored objects.
    #[must_use]
    pub fn disk_usage(&self) -> u64 {
        directory_size(&self.root)
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

    /// Remove every stored object.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::storage(&self.root, e)),
        }
        std::fs::create_dir_all(&self.root).map_err(|e| Error::storage(&self.root, e))
    }
}
