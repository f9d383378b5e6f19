//! Fast (metadata) and full (content) fingerprints.
//!
//! A [`FastFingerprint`] is a stat call away and may collide; a [`ContentHash`]
//! is a BLAKE3 digest of the bytes and is the only fingerprint trusted as
//! cache identity.

use crate::error::{Error, Result};
use crate::id::ArtifactId;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use std::fs::Metadata;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Domain separator for derived key fingerprints.
const DERIVE_CONTEXT: &str = "strata 2026 derived artifact key v1";

/// Inputs larger than this are hashed on the rayon pool.
pub const DEFAULT_PARALLEL_THRESHOLD: usize = 128 * 1024;

/// 32-byte BLAKE3 content hash.
#[derive(
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Length of the digest in bytes.
    pub const LEN: usize = 32;

    /// Wrap raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Hash a byte slice on the calling thread.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        Self(*blake3::hash(bytes).as_bytes())
    }

    /// Derive the key fingerprint of an artifact from its own content hash and
    /// the key fingerprints of its dependencies.
    ///
    /// Dependencies are sorted before hashing, so the result does not depend on
    /// the order in which imports were discovered.
    #[must_use]
    pub fn derive<'a, I>(own: &Self, deps: I) -> Self
    where
        I: IntoIterator<Item = (&'a ArtifactId, &'a Self)>,
    {
        let mut deps: Vec<(&ArtifactId, &Self)> = deps.into_iter().collect();
        deps.sort();
        deps.dedup();

        let mut hasher = blake3::Hasher::new_derive_key(DERIVE_CONTEXT);
        hasher.update(&own.0);
        hasher.update(&(deps.len() as u64).to_le_bytes());
        for (id, fp) in deps {
            let encoded = id.encode();
            hasher.update(&(encoded.len() as u64).to_le_bytes());
            hasher.update(&encoded);
            hasher.update(&fp.0);
        }
        Self(*hasher.finalize().as_bytes())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }

    /// Parse a 64-character hex string.
    pub fn from_hex(s: &str) -> Result<Self> {
        let mut out = [0u8; 32];
        hex::decode_to_slice(s, &mut out)
            .map_err(|e| Error::serialization(format!("invalid content hash '{s}': {e}")))?;
        Ok(Self(out))
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl ArchivedContentHash {
    /// Convert back to an owned hash without a full deserialize.
    #[must_use]
    pub const fn to_native(&self) -> ContentHash {
        ContentHash(self.0)
    }
}

/// Metadata-only fingerprint: modification time and byte size.
#[derive(
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct FastFingerprint {
    /// Whole seconds of the modification time since the Unix epoch.
    pub mtime_secs: u64,
    /// Sub-second part of the modification time.
    pub mtime_nanos: u32,
    /// File size in bytes.
    pub size: u64,
}

impl FastFingerprint {
    /// Build from a modification time and a size.
    #[must_use]
    pub fn new(mtime: SystemTime, size: u64) -> Self {
        let since = mtime.duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            mtime_secs: since.as_secs(),
            mtime_nanos: since.subsec_nanos(),
            size,
        }
    }

    /// Build from file metadata.
    pub fn from_metadata(meta: &Metadata) -> std::io::Result<Self> {
        Ok(Self::new(meta.modified()?, meta.len()))
    }

    /// Modification time.
    #[must_use]
    pub fn mtime(&self) -> SystemTime {
        UNIX_EPOCH + Duration::new(self.mtime_secs, self.mtime_nanos)
    }

    /// Whether the file may still be modified without changing this
    /// fingerprint, given the instant at which the fingerprint was recorded.
    ///
    /// Filesystems with coarse timestamps can report the same mtime for two
    /// writes that land within one tick, so a record taken less than `window`
    /// after the mtime cannot vouch for the content.
    #[must_use]
    pub fn is_racy(&self, recorded_at: SystemTime, window: Duration) -> bool {
        match recorded_at.duration_since(self.mtime()) {
            Ok(elapsed) => elapsed < window,
            Err(_) => true,
        }
    }
}

/// A metadata fingerprint plus the instant it was observed.
///
/// The observation is taken before the stat call, so any write that lands
/// after it carries a newer mtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceStamp {
    /// Metadata at observation time.
    pub fast: FastFingerprint,
    /// When the metadata was read.
    pub observed_at: SystemTime,
}

impl SourceStamp {
    /// Create a stamp.
    #[must_use]
    pub const fn new(fast: FastFingerprint, observed_at: SystemTime) -> Self {
        Self { fast, observed_at }
    }

    /// See [`FastFingerprint::is_racy`].
    #[must_use]
    pub fn is_racy(&self, window: Duration) -> bool {
        self.fast.is_racy(self.observed_at, window)
    }
}

/// Either kind of fingerprint. A fast fingerprint never equals a full one.
#[derive(
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub enum Fingerprint {
    /// Metadata-derived.
    Fast(FastFingerprint),
    /// Content-derived.
    Full(ContentHash),
}

impl Fingerprint {
    /// The content hash, if this is a full fingerprint.
    #[must_use]
    pub const fn as_full(&self) -> Option<&ContentHash> {
        match self {
            Self::Full(h) => Some(h),
            Self::Fast(_) => None,
        }
    }

    /// The metadata fingerprint, if this is a fast fingerprint.
    #[must_use]
    pub const fn as_fast(&self) -> Option<&FastFingerprint> {
        match self {
            Self::Fast(f) => Some(f),
            Self::Full(_) => None,
        }
    }
}

impl From<ContentHash> for Fingerprint {
    fn from(h: ContentHash) -> Self {
        Self::Full(h)
    }
}

impl From<FastFingerprint> for Fingerprint {
    fn from(f: FastFingerprint) -> Self {
        Self::Fast(f)
    }
}

/// Computes fingerprints for source files.
#[derive(Debug, Clone, Copy)]
pub struct FingerprintEngine {
    parallel_threshold: usize,
}

impl Default for FingerprintEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintEngine {
    /// Create an engine with the default parallel-hash threshold.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            parallel_threshold: DEFAULT_PARALLEL_THRESHOLD,
        }
    }

    /// Override the size above which hashing runs on the rayon pool.
    #[must_use]
    pub const fn with_parallel_threshold(mut self, bytes: usize) -> Self {
        self.parallel_threshold = bytes;
        self
    }

    /// Metadata fingerprint of `path`. Performs a single stat call.
    pub fn fast(&self, path: &Path) -> Result<FastFingerprint> {
        let meta = std::fs::metadata(path).map_err(|e| Error::io(path, e))?;
        FastFingerprint::from_metadata(&meta).map_err(|e| Error::io(path, e))
    }

    /// Content fingerprint of `bytes`.
    #[must_use]
    pub fn full(&self, bytes: &[u8]) -> ContentHash {
        if bytes.len() >= self.parallel_threshold {
            let mut hasher = blake3::Hasher::new();
            hasher.update_rayon(bytes);
            ContentHash(*hasher.finalize().as_bytes())
        } else {
            ContentHash::of(bytes)
        }
    }

    /// Observe the metadata of `path`.
    pub fn stamp(&self, path: &Path) -> Result<SourceStamp> {
        let observed_at = SystemTime::now();
        let fast = self.fast(path)?;
        Ok(SourceStamp::new(fast, observed_at))
    }

    /// Read `path` and return its bytes, metadata stamp and content hash.
    ///
    /// Metadata is taken before the read; if the file changes in between, the
    /// stamp is older than the content and the next fast-path probe misses
    /// rather than vouching for bytes it never saw.
    pub fn read(&self, path: &Path) -> Result<(Vec<u8>, SourceStamp, ContentHash)> {
        let stamp = self.stamp(path)?;
        let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
        let full = self.full(&bytes);
        Ok((bytes, stamp, full))
    }
}
