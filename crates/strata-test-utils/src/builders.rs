//! Artifact builders for tests.

use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use strata_core::{ArtifactBuilder, ArtifactId, BuildOutput, Error, Result};

/// Wraps a builder and records every invocation.
#[derive(Debug, Default)]
pub struct CountingBuilder<B> {
    inner: B,
    total: AtomicUsize,
    per_id: Mutex<AHashMap<ArtifactId, usize>>,
}

impl<B> CountingBuilder<B> {
    /// Wrap `inner`.
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            total: AtomicUsize::new(0),
            per_id: Mutex::new(AHashMap::new()),
        }
    }

    /// Total invocations.
    pub fn count(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    /// Invocations for `id`.
    pub fn count_for(&self, id: &ArtifactId) -> usize {
        self.per_id.lock().get(id).copied().unwrap_or(0)
    }

    /// Ids built at least once, sorted.
    pub fn built(&self) -> Vec<ArtifactId> {
        let mut ids: Vec<ArtifactId> = self.per_id.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget every recorded invocation.
    pub fn reset(&self) {
        self.total.store(0, Ordering::SeqCst);
        self.per_id.lock().clear();
    }
}

impl<B: ArtifactBuilder> ArtifactBuilder for CountingBuilder<B> {
    fn build(&self, id: &ArtifactId, source: &[u8]) -> Result<BuildOutput> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.per_id.lock().entry(id.clone()).or_default() += 1;
        self.inner.build(id, source)
    }
}

/// Fails for one artifact path and delegates everything else.
#[derive(Debug)]
pub struct FailingBuilder<B> {
    inner: B,
    path: String,
}

impl<B> FailingBuilder<B> {
    /// Fail whenever the artifact at `path` is built.
    pub fn new(inner: B, path: impl Into<String>) -> Self {
        Self {
            inner,
            path: path.into(),
        }
    }
}

impl<B: ArtifactBuilder> ArtifactBuilder for FailingBuilder<B> {
    fn build(&self, id: &ArtifactId, source: &[u8]) -> Result<BuildOutput> {
        if id.path() == self.path {
            return Err(Error::build(id.clone(), "injected failure"));
        }
        self.inner.build(id, source)
    }
}
