//! Artifact identifiers.

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Identity of a cached artifact: the source path it was derived from plus
/// the analyzer language that produced it.
///
/// Paths are stored with forward slashes so identifiers compare equal across
/// platforms and survive a round trip through the on-disk index.
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
pub struct ArtifactId {
    path: String,
    language: String,
}

impl ArtifactId {
    /// Create a new artifact identifier.
    #[must_use]
    pub fn new(path: impl AsRef<Path>, language: impl Into<String>) -> Self {
        Self {
            path: normalize(path.as_ref()),
            language: language.into(),
        }
    }

    /// Source path, with forward slashes.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Source path as a platform path.
    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.path)
    }

    /// Analyzer language.
    #[must_use]
    pub fn language(&self) -> &str {
        &self.language
    }

    /// Stable byte encoding used as an index key.
    ///
    /// Layout: `u32` little-endian language length, language bytes, path bytes.
    /// Encoding the length first keeps the mapping injective.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + self.language.len() + self.path.len());
        out.extend_from_slice(&(self.language.len() as u32).to_le_bytes());
        out.extend_from_slice(self.language.as_bytes());
        out.extend_from_slice(self.path.as_bytes());
        out
    }

    /// Decode an identifier produced by [`ArtifactId::encode`].
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let len_bytes: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        let lang_len = u32::from_le_bytes(len_bytes) as usize;
        let language = std::str::from_utf8(bytes.get(4..4 + lang_len)?).ok()?;
        let path = std::str::from_utf8(bytes.get(4 + lang_len..)?).ok()?;
        Some(Self {
            path: path.to_string(),
            language: language.to_string(),
        })
    }
}

fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy();
    if std::path::MAIN_SEPARATOR == '/' {
        s.into_owned()
    } else {
        s.replace(std::path::MAIN_SEPARATOR, "/")
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.language, self.path)
    }
}
