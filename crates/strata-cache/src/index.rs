//! Embedded index mapping cache keys to stored objects.
//!
//! Backed by redb. Three tables share one file:
//! - `entries`: live keys
//! - `tombstones`: keys invalidated since the last gc
//! - `invalidated`: keys invalidated and not set since, kept across gc so
//!   the dedup store cannot serve them again
//!
//! Keys are [`CacheKey::encode`] bytes; values are 48-byte [`IndexRecord`]s
//! (empty for `invalidated`).

use ahash::AHashSet;
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::Path;
use strata_core::{CacheKey, ContentHash, Error, Result};
use tracing::warn;

const ENTRIES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("entries");
const TOMBSTONES: TableDefinition<&[u8], &[u8]> = TableDefinition::new("tombstones");
const INVALIDATED: TableDefinition<&[u8], &[u8]> = TableDefinition::new("invalidated");

fn index_err(e: impl Into<redb::Error>) -> Error {
    Error::index(e.into().to_string())
}

/// Where and when a key's object was stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Checksum of the object, which is also its file name.
    pub checksum: ContentHash,
    /// Object size in bytes.
    pub size: u64,
    /// When the key was first written, seconds since the Unix epoch.
    pub created_at: u64,
}

impl IndexRecord {
    const LEN: usize = ContentHash::LEN + 16;

    fn to_bytes(self) -> [u8; Self::LEN] {
        let mut out = [0u8; Self::LEN];
        out[..32].copy_from_slice(self.checksum.as_bytes());
        out[32..40].copy_from_slice(&self.size.to_le_bytes());
        out[40..48].copy_from_slice(&self.created_at.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::LEN {
            return None;
        }
        let checksum: [u8; 32] = bytes[..32].try_into().ok()?;
        Some(Self {
            checksum: ContentHash::from_bytes(checksum),
            size: u64::from_le_bytes(bytes[32..40].try_into().ok()?),
            created_at: u64::from_le_bytes(bytes[40..48].try_into().ok()?),
        })
    }
}

/// Key-to-object index.
pub struct CacheIndex {
    db: Database,
}

impl std::fmt::Debug for CacheIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheIndex").finish_non_exhaustive()
    }
}

impl CacheIndex {
    /// Open or create the index at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Database::create(path).map_err(index_err)?;
        let txn = db.begin_write().map_err(index_err)?;
        {
            txn.open_table(ENTRIES).map_err(index_err)?;
            txn.open_table(TOMBSTONES).map_err(index_err)?;
            txn.open_table(INVALIDATED).map_err(index_err)?;
        }
        txn.commit().map_err(index_err)?;
        Ok(Self { db })
    }

    /// Record for `key`, if live.
    pub fn get(&self, key: &CacheKey) -> Result<Option<IndexRecord>> {
        let txn = self.db.begin_read().map_err(index_err)?;
        let table = txn.open_table(ENTRIES).map_err(index_err)?;
        let encoded = key.encode();
        let value = table.get(encoded.as_slice()).map_err(index_err)?;
        Ok(value.and_then(|v| IndexRecord::from_bytes(v.value())))
    }

    /// Record `key` as live, clearing any tombstone or invalidation mark.
    pub fn insert(&self, key: &CacheKey, record: IndexRecord) -> Result<()> {
        let encoded = key.encode();
        let bytes = record.to_bytes();
        let txn = self.db.begin_write().map_err(index_err)?;
        {
            let mut entries = txn.open_table(ENTRIES).map_err(index_err)?;
            entries
                .insert(encoded.as_slice(), bytes.as_slice())
                .map_err(index_err)?;
            let mut tombstones = txn.open_table(TOMBSTONES).map_err(index_err)?;
            tombstones.remove(encoded.as_slice()).map_err(index_err)?;
            let mut invalidated = txn.open_table(INVALIDATED).map_err(index_err)?;
            invalidated.remove(encoded.as_slice()).map_err(index_err)?;
        }
        txn.commit().map_err(index_err)
    }

    /// Forget `key` entirely. Returns its live record, if any.
    pub fn remove(&self, key: &CacheKey) -> Result<Option<IndexRecord>> {
        let encoded = key.encode();
        let txn = self.db.begin_write().map_err(index_err)?;
        let removed = {
            let mut entries = txn.open_table(ENTRIES).map_err(index_err)?;
            let removed = entries
                .remove(encoded.as_slice())
                .map_err(index_err)?
                .and_then(|v| IndexRecord::from_bytes(v.value()));
            let mut tombstones = txn.open_table(TOMBSTONES).map_err(index_err)?;
            tombstones.remove(encoded.as_slice()).map_err(index_err)?;
            removed
        };
        txn.commit().map_err(index_err)?;
        Ok(removed)
    }

    /// Move `key` from the live table to the tombstone table and mark it
    /// invalidated. Returns `false` if it was not live; the mark is recorded
    /// either way.
    pub fn tombstone(&self, key: &CacheKey) -> Result<bool> {
        let encoded = key.encode();
        let txn = self.db.begin_write().map_err(index_err)?;
        let moved = {
            let mut invalidated = txn.open_table(INVALIDATED).map_err(index_err)?;
            invalidated
                .insert(encoded.as_slice(), b"".as_slice())
                .map_err(index_err)?;
            let mut entries = txn.open_table(ENTRIES).map_err(index_err)?;
            let record = entries
                .remove(encoded.as_slice())
                .map_err(index_err)?
                .map(|v| v.value().to_vec());
            match record {
                Some(record) => {
                    let mut tombstones = txn.open_table(TOMBSTONES).map_err(index_err)?;
                    tombstones
                        .insert(encoded.as_slice(), record.as_slice())
                        .map_err(index_err)?;
                    true
                }
                None => false,
            }
        };
        txn.commit().map_err(index_err)?;
        Ok(moved)
    }

    /// Whether `key` was invalidated and has not been inserted since.
    pub fn is_invalidated(&self, key: &CacheKey) -> Result<bool> {
        let txn = self.db.begin_read().map_err(index_err)?;
        let table = txn.open_table(INVALIDATED).map_err(index_err)?;
        let encoded = key.encode();
        Ok(table.get(encoded.as_slice()).map_err(index_err)?.is_some())
    }

    /// Drop invalidation marks whose fingerprint is not in `stored`.
    /// Returns the number dropped.
    pub fn prune_invalidated(&self, stored: &AHashSet<ContentHash>) -> Result<usize> {
        let txn = self.db.begin_write().map_err(index_err)?;
        let pruned = {
            let mut table = txn.open_table(INVALIDATED).map_err(index_err)?;
            let before = table.len().map_err(index_err)?;
            table
                .retain(|key, _| {
                    CacheKey::decode(key).is_some_and(|k| stored.contains(&k.fingerprint))
                })
                .map_err(index_err)?;
            before.saturating_sub(table.len().map_err(index_err)?) as usize
        };
        txn.commit().map_err(index_err)?;
        Ok(pruned)
    }

    /// Number of invalidation marks.
    pub fn invalidated_count(&self) -> Result<u64> {
        let txn = self.db.begin_read().map_err(index_err)?;
        let table = txn.open_table(INVALIDATED).map_err(index_err)?;
        table.len().map_err(index_err)
    }

    /// Remove and return every tombstone.
    pub fn take_tombstones(&self) -> Result<Vec<(CacheKey, IndexRecord)>> {
        let txn = self.db.begin_write().map_err(index_err)?;
        let taken = {
            let mut tombstones = txn.open_table(TOMBSTONES).map_err(index_err)?;
            let taken = collect_rows(&tombstones)?;
            tombstones
                .retain(|_, _| false)
                .map_err(index_err)?;
            taken
        };
        txn.commit().map_err(index_err)?;
        Ok(taken)
    }

    /// Every live key with its record.
    pub fn entries(&self) -> Result<Vec<(CacheKey, IndexRecord)>> {
        let txn = self.db.begin_read().map_err(index_err)?;
        let table = txn.open_table(ENTRIES).map_err(index_err)?;
        collect_rows(&table)
    }

    /// Number of live keys.
    pub fn len(&self) -> Result<u64> {
        let txn = self.db.begin_read().map_err(index_err)?;
        let table = txn.open_table(ENTRIES).map_err(index_err)?;
        table.len().map_err(index_err)
    }

    /// Whether there are no live keys.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Number of tombstoned keys awaiting gc.
    pub fn tombstone_count(&self) -> Result<u64> {
        let txn = self.db.begin_read().map_err(index_err)?;
        let table = txn.open_table(TOMBSTONES).map_err(index_err)?;
        table.len().map_err(index_err)
    }

    /// Checksums referenced by live keys or pending tombstones.
    pub fn referenced_checksums(&self) -> Result<AHashSet<ContentHash>> {
        let txn = self.db.begin_read().map_err(index_err)?;
        let mut out = AHashSet::new();
        for table in [ENTRIES, TOMBSTONES] {
            let table = txn.open_table(table).map_err(index_err)?;
            for row in table.iter().map_err(index_err)? {
                let (_, value) = row.map_err(index_err)?;
                if let Some(record) = IndexRecord::from_bytes(value.value()) {
                    out.insert(record.checksum);
                }
            }
        }
        Ok(out)
    }

    /// Drop every row pointing at `checksum`. Returns the number removed.
    pub fn remove_by_checksum(&self, checksum: &ContentHash) -> Result<usize> {
        let txn = self.db.begin_write().map_err(index_err)?;
        let mut removed = 0;
        {
            for table in [ENTRIES, TOMBSTONES] {
                let mut table = txn.open_table(table).map_err(index_err)?;
                let before = table.len().map_err(index_err)?;
                table
                    .retain(|_, value| {
                        IndexRecord::from_bytes(value).is_none_or(|r| r.checksum != *checksum)
                    })
                    .map_err(index_err)?;
                removed += before.saturating_sub(table.len().map_err(index_err)?) as usize;
            }
        }
        txn.commit().map_err(index_err)?;
        Ok(removed)
    }

    /// Remove every row.
    pub fn clear(&self) -> Result<()> {
        let txn = self.db.begin_write().map_err(index_err)?;
        {
            for table in [ENTRIES, TOMBSTONES, INVALIDATED] {
                let mut table = txn.open_table(table).map_err(index_err)?;
                table.retain(|_, _| false).map_err(index_err)?;
            }
        }
        txn.commit().map_err(index_err)
    }
}

fn collect_rows<T>(table: &T) -> Result<Vec<(CacheKey, IndexRecord)>>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    let mut rows = Vec::new();
    for row in table.iter().map_err(index_err)? {
        let (key, value) = row.map_err(index_err)?;
        match (
            CacheKey::decode(key.value()),
            IndexRecord::from_bytes(value.value()),
        ) {
            (Some(key), Some(record)) => rows.push((key, record)),
            _ => warn!(len = key.value().len(), "skipping malformed index row"),
        }
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use strata_core::ArtifactId;

    fn key(name: &str) -> CacheKey {
        CacheKey::new(ArtifactId::new(name, "rust"), ContentHash::of(name.as_bytes()))
    }

    fn record(n: u8) -> IndexRecord {
        IndexRecord {
            checksum: ContentHash::of(&[n]),
            size: u64::from(n) * 10,
            created_at: 1_700_000_000,
        }
    }

    fn open() -> (tempfile::TempDir, CacheIndex) {
        let dir = tempfile::tempdir().unwrap();
        let index = CacheIndex::open(&dir.path().join("index.redb")).unwrap();
        (dir, index)
    }

    #[test]
    fn test_insert_get_remove() {
        let (_dir, index) = open();
        index.insert(&key("a"), record(1)).unwrap();
        assert_eq!(index.get(&key("a")).unwrap(), Some(record(1)));
        assert_eq!(index.len().unwrap(), 1);
        assert_eq!(index.remove(&key("a")).unwrap(), Some(record(1)));
        assert_eq!(index.get(&key("a")).unwrap(), None);
    }

    #[test]
    fn test_tombstone_and_take() {
        let (_dir, index) = open();
        index.insert(&key("a"), record(1)).unwrap();
        assert!(index.tombstone(&key("a")).unwrap());
        assert!(!index.tombstone(&key("missing")).unwrap());
        assert_eq!(index.get(&key("a")).unwrap(), None);
        assert_eq!(index.tombstone_count().unwrap(), 1);
        // Tombstoned objects stay referenced until gc takes them.
        assert!(index.referenced_checksums().unwrap().contains(&record(1).checksum));

        let taken = index.take_tombstones().unwrap();
        assert_eq!(taken, vec![(key("a"), record(1))]);
        assert_eq!(index.tombstone_count().unwrap(), 0);
    }

    #[test]
    fn test_insert_clears_tombstone() {
        let (_dir, index) = open();
        index.insert(&key("a"), record(1)).unwrap();
        index.tombstone(&key("a")).unwrap();
        index.insert(&key("a"), record(1)).unwrap();
        assert_eq!(index.tombstone_count().unwrap(), 0);
        assert_eq!(index.get(&key("a")).unwrap(), Some(record(1)));
    }

    #[test]
    fn test_invalidation_mark_outlives_tombstone() {
        let (_dir, index) = open();
        index.insert(&key("a"), record(1)).unwrap();
        index.tombstone(&key("a")).unwrap();
        index.take_tombstones().unwrap();
        assert!(index.is_invalidated(&key("a")).unwrap());

        // Marks are recorded for keys that were never live, too.
        assert!(!index.tombstone(&key("b")).unwrap());
        assert!(index.is_invalidated(&key("b")).unwrap());

        index.insert(&key("a"), record(1)).unwrap();
        assert!(!index.is_invalidated(&key("a")).unwrap());
    }

    #[test]
    fn test_prune_invalidated_keeps_stored_fingerprints() {
        let (_dir, index) = open();
        index.tombstone(&key("a")).unwrap();
        index.tombstone(&key("b")).unwrap();
        let stored: AHashSet<ContentHash> = [key("a").fingerprint].into_iter().collect();

        assert_eq!(index.prune_invalidated(&stored).unwrap(), 1);
        assert!(index.is_invalidated(&key("a")).unwrap());
        assert!(!index.is_invalidated(&key("b")).unwrap());
        assert_eq!(index.invalidated_count().unwrap(), 1);
    }

    #[test]
    fn test_remove_by_checksum() {
        let (_dir, index) = open();
        index.insert(&key("a"), record(1)).unwrap();
        index.insert(&key("b"), record(1)).unwrap();
        index.insert(&key("c"), record(2)).unwrap();
        assert_eq!(index.remove_by_checksum(&record(1).checksum).unwrap(), 2);
        assert_eq!(index.entries().unwrap(), vec![(key("c"), record(2))]);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.redb");
        {
            let index = CacheIndex::open(&path).unwrap();
            index.insert(&key("a"), record(3)).unwrap();
        }
        let index = CacheIndex::open(&path).unwrap();
        assert_eq!(index.get(&key("a")).unwrap(), Some(record(3)));
    }

    #[test]
    fn test_clear() {
        let (_dir, index) = open();
        index.insert(&key("a"), record(1)).unwrap();
        index.insert(&key("b"), record(2)).unwrap();
        index.tombstone(&key("b")).unwrap();
        index.clear().unwrap();
        assert!(index.is_empty().unwrap());
        assert_eq!(index.tombstone_count().unwrap(), 0);
        assert_eq!(index.invalidated_count().unwrap(), 0);
    }
}
