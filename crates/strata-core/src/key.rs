//! Immutable cache keys.

use crate::fingerprint::ContentHash;
use crate::id::ArtifactId;
use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;

/// Identity of one version of one artifact.
///
/// A content change produces a new key; the entry stored under an existing key
/// is never replaced with different content.
#[derive(
    Archive,
    Serialize,
    Deserialize,
    SerdeSerialize,
    SerdeDeserialize,
    Debug,
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct CacheKey {
    /// Which artifact.
    pub id: ArtifactId,
    /// Which version of it.
    pub fingerprint: ContentHash,
}

impl CacheKey {
    /// Create a key.
    #[must_use]
    pub const fn new(id: ArtifactId, fingerprint: ContentHash) -> Self {
        Self { id, fingerprint }
    }

    /// Byte encoding used by the on-disk index: encoded id followed by the
    /// 32-byte fingerprint.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.id.encode();
        out.extend_from_slice(self.fingerprint.as_bytes());
        out
    }

    /// Decode a key produced by [`CacheKey::encode`].
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let split = bytes.len().checked_sub(ContentHash::LEN)?;
        let (id, fp) = bytes.split_at(split);
        let fp: [u8; 32] = fp.try_into().ok()?;
        Some(Self {
            id: ArtifactId::decode(id)?,
            fingerprint: ContentHash::from_bytes(fp),
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.fingerprint.short())
    }
}
