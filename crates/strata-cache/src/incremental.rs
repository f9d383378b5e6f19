//! Incremental indexing over a source tree.
//!
//! The indexer ties the pieces together: it fingerprints sources, builds what
//! changed, asks the dependency graph what else went stale, and rebuilds that
//! in dependency order. Everything else is answered from the cache.

use crate::tiered::TieredCache;
use ahash::AHashMap;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::time::{Duration, Instant};
use strata_core::{
    ArtifactBuilder, ArtifactId, BuildOutput, CacheEntry, CacheKey, ContentHash,
    FingerprintEngine, Result, SharedEntry, SourceFile, SourceStamp,
};
use strata_graph::{DependencyGraph, NodeState};
use tracing::{debug, info, warn};

type LiveSet = HashSet<ArtifactId, ahash::RandomState>;

/// What one `index` call did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    /// Sources present on disk.
    pub scanned: usize,
    /// Sources whose content differs from the last run.
    pub changed: Vec<ArtifactId>,
    /// Changed sources plus everything depending on them.
    pub affected: BTreeSet<ArtifactId>,
    /// Order in which the rebuild batch was processed.
    pub order: Vec<ArtifactId>,
    /// Artifacts the builder was invoked for.
    pub built: Vec<ArtifactId>,
    /// Artifacts served by the cache.
    pub hits: usize,
    /// Sources confirmed unchanged by metadata alone.
    pub fast_path_hits: usize,
    /// Artifacts whose source disappeared.
    pub removed: Vec<ArtifactId>,
    /// Wall time of the run.
    pub duration: Duration,
}

impl IndexReport {
    /// Number of builder invocations.
    #[must_use]
    pub fn rebuilds(&self) -> usize {
        self.built.len()
    }
}

/// Outcome of fingerprinting one source.
enum Scan {
    Missing,
    /// Metadata matched a trusted hot-tier record; the bytes were not read.
    Unchanged {
        hash: ContentHash,
        stamp: SourceStamp,
    },
    Read {
        bytes: Vec<u8>,
        hash: ContentHash,
        stamp: SourceStamp,
    },
}

struct Scanned {
    source: SourceFile,
    hash: ContentHash,
    stamp: SourceStamp,
    bytes: Option<Vec<u8>>,
}

/// Keeps a cache and a dependency graph in step with a set of sources.
pub struct IncrementalIndexer<'c, B> {
    cache: &'c TieredCache,
    graph: DependencyGraph,
    engine: FingerprintEngine,
    builder: B,
}

impl<B> std::fmt::Debug for IncrementalIndexer<'_, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalIndexer")
            .field("cache", &self.cache.root())
            .field("nodes", &self.graph.len())
            .finish_non_exhaustive()
    }
}

impl<'c, B: ArtifactBuilder> IncrementalIndexer<'c, B> {
    /// Start with an empty graph.
    #[must_use]
    pub fn new(cache: &'c TieredCache, builder: B) -> Self {
        Self {
            cache,
            graph: DependencyGraph::new(),
            engine: FingerprintEngine::new(),
            builder,
        }
    }

    /// Start from the graph saved in the cache root, if any.
    ///
    /// # Errors
    /// Returns error if a saved graph exists but cannot be decoded.
    pub fn resume(cache: &'c TieredCache, builder: B) -> Result<Self> {
        let graph = DependencyGraph::load(&cache.graph_path())?;
        debug!(nodes = graph.len(), "resumed dependency graph");
        Ok(Self {
            cache,
            graph,
            engine: FingerprintEngine::new(),
            builder,
        })
    }

    /// Use a custom fingerprint engine.
    #[must_use]
    pub const fn with_engine(mut self, engine: FingerprintEngine) -> Self {
        self.engine = engine;
        self
    }

    /// The dependency graph as of the last run.
    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Persist the graph next to the cache.
    ///
    /// # Errors
    /// Returns error if the snapshot cannot be written.
    pub fn save(&self) -> Result<()> {
        self.graph.save(&self.cache.graph_path())
    }

    /// Bring the cache up to date with `sources`.
    ///
    /// Sources absent from the list, or missing on disk, are dropped from the
    /// graph and the cache. Assumes this indexer owns every artifact in the
    /// cache root.
    ///
    /// # Errors
    /// Returns the first source read error, builder error or dependency
    /// cycle. A failed builder aborts the batch before anything it produced
    /// is inserted.
    pub fn index(&mut self, sources: &[SourceFile]) -> Result<IndexReport> {
        let start = Instant::now();
        let mut report = IndexReport::default();

        let (mut scanned, missing) = self.scan(sources, &mut report)?;
        report.scanned = scanned.len();

        let live: LiveSet = scanned.keys().cloned().collect();
        let orphan_dependents = self.remove_missing(&live, missing, &mut report)?;

        let mut changed: Vec<ArtifactId> = scanned
            .values()
            .filter(|s| self.graph.fingerprint(&s.source.id) != Some(s.hash))
            .map(|s| s.source.id.clone())
            .collect();
        changed.sort();

        let mut prebuilt = self.build_changed(&changed, &scanned)?;
        for id in &changed {
            if let (Some(output), Some(s)) = (prebuilt.get(id), scanned.get(id)) {
                self.graph.register(id, s.hash, &output.dependencies);
            }
        }

        let mut roots = changed.clone();
        roots.extend(orphan_dependents);
        let affected: BTreeSet<ArtifactId> = self
            .graph
            .affected_by(&roots)
            .into_iter()
            .filter(|id| live.contains(id))
            .collect();

        let mut batch = affected.clone();
        for (id, s) in &scanned {
            if affected.contains(id) {
                continue;
            }
            if self.cached(id, s).is_some() {
                report.hits += 1;
            } else {
                batch.insert(id.clone());
            }
        }

        let order = self.graph.build_order(&batch)?;
        for id in &order {
            let Some(s) = scanned.get_mut(id) else {
                continue;
            };
            self.materialize(s, prebuilt.remove(id), &mut report)?;
        }

        report.changed = changed;
        report.affected = affected;
        report.order = order;
        report.duration = start.elapsed();
        info!(
            scanned = report.scanned,
            changed = report.changed.len(),
            affected = report.affected.len(),
            built = report.built.len(),
            hits = report.hits,
            "index complete"
        );
        Ok(report)
    }

    /// Fingerprint every source in parallel.
    fn scan(
        &self,
        sources: &[SourceFile],
        report: &mut IndexReport,
    ) -> Result<(AHashMap<ArtifactId, Scanned>, Vec<ArtifactId>)> {
        let results: Vec<(SourceFile, Scan)> = sources
            .par_iter()
            .map(|source| self.scan_one(source).map(|scan| (source.clone(), scan)))
            .collect::<Result<_>>()?;

        let mut scanned = AHashMap::with_capacity(results.len());
        let mut missing = Vec::new();
        for (source, scan) in results {
            let (hash, stamp, bytes) = match scan {
                Scan::Missing => {
                    missing.push(source.id);
                    continue;
                }
                Scan::Unchanged { hash, stamp } => {
                    report.fast_path_hits += 1;
                    (hash, stamp, None)
                }
                Scan::Read { bytes, hash, stamp } => (hash, stamp, Some(bytes)),
            };
            scanned.insert(
                source.id.clone(),
                Scanned {
                    source,
                    hash,
                    stamp,
                    bytes,
                },
            );
        }
        Ok((scanned, missing))
    }

    fn scan_one(&self, source: &SourceFile) -> Result<Scan> {
        let stamp = match self.engine.stamp(&source.path) {
            Ok(stamp) => stamp,
            Err(e) if e.is_not_found() => return Ok(Scan::Missing),
            Err(e) => return Err(e),
        };

        if let (Some(entry), Some(registered)) = (
            self.cache.probe_fast(&source.id, &stamp.fast),
            self.graph.fingerprint(&source.id),
        ) {
            if *entry.source_hash() == registered {
                return Ok(Scan::Unchanged {
                    hash: registered,
                    stamp,
                });
            }
        }

        match self.engine.read(&source.path) {
            Ok((bytes, stamp, hash)) => Ok(Scan::Read { bytes, hash, stamp }),
            Err(e) if e.is_not_found() => Ok(Scan::Missing),
            Err(e) => Err(e),
        }
    }

    /// Drop vanished artifacts from the graph and the cache. Returns the
    /// surviving artifacts that depended on them.
    fn remove_missing(
        &mut self,
        live: &LiveSet,
        missing: Vec<ArtifactId>,
        report: &mut IndexReport,
    ) -> Result<Vec<ArtifactId>> {
        let mut removed: BTreeSet<ArtifactId> = missing.into_iter().collect();
        removed.extend(
            self.graph
                .ids()
                .into_iter()
                .filter(|id| self.graph.fingerprint(id).is_some() && !live.contains(id)),
        );
        if removed.is_empty() {
            return Ok(Vec::new());
        }

        let mut dependents = Vec::new();
        for id in &removed {
            dependents.extend(self.graph.remove(id));
        }
        dependents.retain(|id| live.contains(id));

        let purged = self.cache.purge_orphans(live)?;
        debug!(removed = removed.len(), purged, "dropped vanished sources");
        report.removed = removed.into_iter().collect();
        Ok(dependents)
    }

    /// Build every changed source in parallel. Any failure fails the batch.
    fn build_changed(
        &self,
        changed: &[ArtifactId],
        scanned: &AHashMap<ArtifactId, Scanned>,
    ) -> Result<AHashMap<ArtifactId, BuildOutput>> {
        let built: Vec<(ArtifactId, BuildOutput)> = changed
            .par_iter()
            .filter_map(|id| {
                let bytes = scanned.get(id)?.bytes.as_deref()?;
                Some(self.builder.build(id, bytes).map(|out| (id.clone(), out)))
            })
            .collect::<Result<_>>()?;
        Ok(built.into_iter().collect())
    }

    /// Cached artifact under the key recorded for `id`, if it is still valid.
    fn cached(&self, id: &ArtifactId, s: &Scanned) -> Option<SharedEntry> {
        if self.graph.state(id) == NodeState::Affected {
            return None;
        }
        let key_fp = self.graph.key_fingerprint(id)?;
        self.cache
            .get(&CacheKey::new(id.clone(), key_fp), Some(&s.stamp.fast))
    }

    fn derive_key(&self, id: &ArtifactId, own: &ContentHash) -> CacheKey {
        let deps: Vec<(ArtifactId, ContentHash)> = self
            .graph
            .dependencies(id)
            .into_iter()
            .map(|dep| {
                let fp = self
                    .graph
                    .key_fingerprint(&dep)
                    .or_else(|| self.graph.fingerprint(&dep))
                    .unwrap_or_default();
                (dep, fp)
            })
            .collect();
        let fingerprint = ContentHash::derive(own, deps.iter().map(|(d, fp)| (d, fp)));
        CacheKey::new(id.clone(), fingerprint)
    }

    /// Look up or build one artifact of the rebuild batch.
    fn materialize(
        &mut self,
        s: &mut Scanned,
        prebuilt: Option<BuildOutput>,
        report: &mut IndexReport,
    ) -> Result<()> {
        let id = s.source.id.clone();
        let key = self.derive_key(&id, &s.hash);

        if let Some(entry) = self.cache.get(&key, Some(&s.stamp.fast)) {
            self.graph.register(&id, s.hash, entry.dependencies());
            self.graph.set_key_fingerprint(&id, key.fingerprint);
            report.hits += 1;
            return Ok(());
        }

        let output = match prebuilt {
            Some(output) => output,
            None => {
                let bytes = match s.bytes.take() {
                    Some(bytes) => bytes,
                    None => {
                        let (bytes, stamp, hash) = self.engine.read(&s.source.path)?;
                        if hash != s.hash {
                            warn!(id = %id, "source changed during indexing, skipping");
                            return Ok(());
                        }
                        s.stamp = stamp;
                        bytes
                    }
                };
                self.builder.build(&id, &bytes)?
            }
        };

        self.graph.register(&id, s.hash, &output.dependencies);
        let entry = CacheEntry::new(key.clone(), output.payload, output.dependencies, s.hash)
            .with_source_stamp(s.stamp);
        self.cache.set(entry);
        self.graph.set_key_fingerprint(&id, key.fingerprint);
        debug!(id = %id, key = %key, "built artifact");
        report.built.push(id);
        Ok(())
    }
}
