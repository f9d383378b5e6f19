//! Interface to the component that turns source bytes into artifacts.

use crate::error::Result;
use crate::id::ArtifactId;
use bytes::Bytes;
use std::path::PathBuf;

/// A source file to index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceFile {
    /// Artifact produced from this file.
    pub id: ArtifactId,
    /// Where to read it from.
    pub path: PathBuf,
}

impl SourceFile {
    /// Create a source file entry.
    #[must_use]
    pub fn new(id: ArtifactId, path: impl Into<PathBuf>) -> Self {
        Self {
            id,
            path: path.into(),
        }
    }
}

/// What a builder produces for one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutput {
    /// Serialized artifact.
    pub payload: Bytes,
    /// Artifacts this one references.
    pub dependencies: Vec<ArtifactId>,
}

impl BuildOutput {
    /// Create a build output.
    #[must_use]
    pub fn new(payload: impl Into<Bytes>, dependencies: Vec<ArtifactId>) -> Self {
        Self {
            payload: payload.into(),
            dependencies,
        }
    }
}

/// Builds an artifact from source bytes.
///
/// Called only on a full cache miss, possibly from several threads at once.
/// A failed build must not leave anything behind; the caller discards the
/// whole batch.
pub trait ArtifactBuilder: Send + Sync {
    /// Build the artifact for `id` from `source`.
    fn build(&self, id: &ArtifactId, source: &[u8]) -> Result<BuildOutput>;
}

impl<B: ArtifactBuilder + ?Sized> ArtifactBuilder for &B {
    fn build(&self, id: &ArtifactId, source: &[u8]) -> Result<BuildOutput> {
        (**self).build(id, source)
    }
}

impl<B: ArtifactBuilder + ?Sized> ArtifactBuilder for Box<B> {
    fn build(&self, id: &ArtifactId, source: &[u8]) -> Result<BuildOutput> {
        (**self).build(id, source)
    }
}
