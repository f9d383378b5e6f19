//! On-disk artifact envelope shared by the cold tier and the dedup store.
//!
//! Layout:
//!
//! ```text
//! [0..8)    magic "STRATART"
//! [8..12)   format version, u32 LE
//! [12..16)  reserved, zero
//! [16..n)   rkyv archive of StoredArtifact
//! [n..n+32) BLAKE3 of bytes [0..n)
//! ```
//!
//! The 16-byte header keeps the archive 16-aligned inside a memory map.

use memmap2::Mmap;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use strata_core::{ArtifactId, CacheEntry, CacheKey, ContentHash, Error, Result};

/// Magic bytes at the start of every stored artifact.
pub const ARTIFACT_MAGIC: &[u8; 8] = b"STRATART";

/// Current envelope version.
pub const FORMAT_VERSION: u32 = 1;

const HEADER_LEN: usize = 16;
const CHECKSUM_LEN: usize = ContentHash::LEN;
const ARCHIVE_ALIGN: usize = 16;

/// The persisted part of a cache entry. The key is not stored: it lives in
/// the index, and identical artifacts under different keys share one file.
#[derive(Archive, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    /// Artifact bytes.
    pub payload: Vec<u8>,
    /// Dependencies recorded at build time.
    pub dependencies: Vec<ArtifactId>,
    /// Content hash of the source.
    pub source_hash: ContentHash,
}

impl StoredArtifact {
    /// Capture the persisted fields of `entry`.
    #[must_use]
    pub fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            payload: entry.payload().to_vec(),
            dependencies: entry.dependencies().to_vec(),
            source_hash: *entry.source_hash(),
        }
    }

    /// Materialize under `key`.
    #[must_use]
    pub fn into_entry(self, key: CacheKey, created_at: u64) -> CacheEntry {
        CacheEntry::new(key, self.payload, self.dependencies, self.source_hash)
            .with_created_at(created_at)
    }
}

/// Serialize into the envelope. Returns the bytes and their checksum.
pub fn encode(artifact: &StoredArtifact) -> Result<(Vec<u8>, ContentHash)> {
    let archive = rkyv::to_bytes::<rkyv::rancor::Error>(artifact)
        .map_err(|e| Error::serialization(format!("encode artifact: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + archive.len() + CHECKSUM_LEN);
    out.extend_from_slice(ARTIFACT_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&archive);

    let checksum = ContentHash::of(&out);
    out.extend_from_slice(checksum.as_bytes());
    Ok((out, checksum))
}

/// Validate and deserialize an envelope read from `path`.
///
/// Any mismatch (length, magic, checksum, archive validation) is reported as
/// [`Error::Corruption`]; only a supported-but-different version is a
/// serialization error.
pub fn decode(bytes: &[u8], path: &Path) -> Result<(StoredArtifact, ContentHash)> {
    let corrupt = |expected: String, actual: String| Error::Corruption {
        path: path.to_path_buf(),
        expected,
        actual,
    };

    if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
        return Err(corrupt(
            format!("at least {} bytes", HEADER_LEN + CHECKSUM_LEN),
            format!("{} bytes", bytes.len()),
        ));
    }

    let (body, stored) = bytes.split_at(bytes.len() - CHECKSUM_LEN);
    let mut expected = [0u8; CHECKSUM_LEN];
    expected.copy_from_slice(stored);
    let expected = ContentHash::from_bytes(expected);
    let actual = ContentHash::of(body);
    if actual != expected {
        return Err(corrupt(expected.to_hex(), actual.to_hex()));
    }

    if &body[..8] != ARTIFACT_MAGIC {
        return Err(corrupt(
            hex::encode(ARTIFACT_MAGIC),
            hex::encode(&body[..8]),
        ));
    }
    let mut version = [0u8; 4];
    version.copy_from_slice(&body[8..12]);
    let version = u32::from_le_bytes(version);
    if version != FORMAT_VERSION {
        return Err(Error::serialization(format!(
            "{}: unsupported artifact format version {version}",
            path.display()
        )));
    }

    let archive = &body[HEADER_LEN..];
    let invalid = |e: rkyv::rancor::Error| corrupt("valid archive".to_string(), e.to_string());
    let artifact = if (archive.as_ptr() as usize) % ARCHIVE_ALIGN == 0 {
        let archived = rkyv::access::<ArchivedStoredArtifact, rkyv::rancor::Error>(archive)
            .map_err(invalid)?;
        rkyv::deserialize::<StoredArtifact, rkyv::rancor::Error>(archived).map_err(invalid)?
    } else {
        let mut aligned = AlignedVec::<ARCHIVE_ALIGN>::with_capacity(archive.len());
        aligned.extend_from_slice(archive);
        rkyv::from_bytes::<StoredArtifact, rkyv::rancor::Error>(&aligned).map_err(invalid)?
    };

    Ok((artifact, expected))
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// flushed before the rename so a crash never leaves a partial file under the
/// final name.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;
    let mut temp = tempfile::Builder::new()
        .prefix(".tmp-")
        .tempfile_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Memory-map an object file. Returns `None` for an empty file, which can
/// never be a valid envelope.
pub fn map_object(path: &Path) -> std::io::Result<Option<Mmap>> {
    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        return Ok(None);
    }
    // SAFETY: object files are written once through a temp file and renamed
    // into place; they are never modified afterwards, only deleted. Deleting
    // a mapped file keeps the mapping valid on the platforms we support.
    let map = unsafe { Mmap::map(&file)? };
    Ok(Some(map))
}

/// Two-character fan-out directory plus file name for a checksum.
#[must_use]
pub fn object_relative_path(checksum: &ContentHash) -> std::path::PathBuf {
    let hex = checksum.to_hex();
    Path::new(&hex[..2]).join(format!("{hex}.art"))
}

/// Parse the checksum out of an object file name.
#[must_use]
pub fn checksum_from_file_name(path: &Path) -> Option<ContentHash> {
    if path.extension()? != "art" {
        return None;
    }
    ContentHash::from_hex(path.file_stem()?.to_str()?).ok()
}
