//! End-to-end tests for incremental indexing.

use std::collections::BTreeSet;
use std::time::Duration;
use strata_cache::{CacheConfig, ImportScanner, IncrementalIndexer, TieredCache};
use strata_core::{ArtifactId, CacheKey, Error};
use strata_test_utils::prelude::*;
use strata_test_utils::prelude::{assert_eq, assert_ne};
use tempfile::TempDir;

fn id(path: &str) -> ArtifactId {
    ArtifactId::new(path, "txt")
}

/// a imports b, b imports c.
fn chain() -> TempProject {
    TempProject::new()
        .unwrap()
        .with_file("a.txt", "import b.txt\nalpha\n")
        .unwrap()
        .with_file("b.txt", "import c.txt\nbeta\n")
        .unwrap()
        .with_file("c.txt", "gamma\n")
        .unwrap()
}

#[test]
fn test_three_file_chain() {
    let project = chain();
    let root = TempDir::new().unwrap();
    let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
    let builder = CountingBuilder::new(ImportScanner::new());
    let mut indexer = IncrementalIndexer::new(&cache, &builder);

    // Cold start: three misses, edges registered.
    let first = indexer.index(&project.sources("txt").unwrap()).unwrap();
    assert_eq!(builder.count(), 3);
    assert_eq!(first.order, vec![id("c.txt"), id("b.txt"), id("a.txt")]);
    assert_eq!(indexer.graph().dependencies(&id("a.txt")), vec![id("b.txt")]);
    assert_eq!(indexer.graph().dependencies(&id("b.txt")), vec![id("c.txt")]);

    let old_a = indexer.graph().key_fingerprint(&id("a.txt")).unwrap();
    let old_b = indexer.graph().key_fingerprint(&id("b.txt")).unwrap();

    // Only c changes.
    project.write("c.txt", "gamma prime\n").unwrap();
    builder.reset();
    let second = indexer.index(&project.sources("txt").unwrap()).unwrap();

    assert_eq!(second.changed, vec![id("c.txt")]);
    let expected: BTreeSet<_> = [id("a.txt"), id("b.txt"), id("c.txt")].into();
    assert_eq!(second.affected, expected);
    assert_eq!(builder.count(), 3);
    assert_eq!(second.rebuilds(), 3);

    let new_a = indexer.graph().key_fingerprint(&id("a.txt")).unwrap();
    let new_b = indexer.graph().key_fingerprint(&id("b.txt")).unwrap();
    assert_ne!(new_a, old_a);
    assert_ne!(new_b, old_b);

    // Readers on the old snapshot still find their artifacts.
    let keys = [
        ("a.txt", old_a),
        ("b.txt", old_b),
        ("a.txt", new_a),
        ("b.txt", new_b),
    ];
    for (path, fp) in keys {
        assert!(cache.get(&CacheKey::new(id(path), fp), None).is_some());
    }
    cache.flush().unwrap();
    assert_eq!(cache.disk_usage().unwrap().cold_entries, 6);
}

#[test]
fn test_nothing_changed_builds_nothing() {
    let project = chain();
    let root = TempDir::new().unwrap();
    let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
    let builder = CountingBuilder::new(ImportScanner::new());
    let mut indexer = IncrementalIndexer::new(&cache, &builder);
    let sources = project.sources("txt").unwrap();

    indexer.index(&sources).unwrap();
    builder.reset();
    let report = indexer.index(&sources).unwrap();
    assert_eq!(builder.count(), 0);
    assert_eq!(report.hits, 3);
    assert!(report.changed.is_empty());
}

#[test]
fn test_fast_path_skips_reading_old_files() {
    let project = chain();
    project.age_all(Duration::from_secs(120)).unwrap();
    let root = TempDir::new().unwrap();
    let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
    let mut indexer = IncrementalIndexer::new(&cache, ImportScanner::new());
    let sources = project.sources("txt").unwrap();

    let first = indexer.index(&sources).unwrap();
    assert_eq!(first.fast_path_hits, 0);
    let second = indexer.index(&sources).unwrap();
    assert_eq!(second.fast_path_hits, 3);
    assert_eq!(second.rebuilds(), 0);
}

#[test]
fn test_racy_rewrite_is_rebuilt() {
    let project = TempProject::new()
        .unwrap()
        .with_file("a.txt", "abcd\n")
        .unwrap();
    let root = TempDir::new().unwrap();
    let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
    let builder = CountingBuilder::new(ImportScanner::new());
    let mut indexer = IncrementalIndexer::new(&cache, &builder);
    let sources = project.sources("txt").unwrap();
    indexer.index(&sources).unwrap();

    // Same size, same mtime, different content.
    let mtime = project.mtime("a.txt").unwrap();
    project.write("a.txt", "dcba\n").unwrap();
    project.set_mtime("a.txt", mtime).unwrap();

    let report = indexer.index(&sources).unwrap();
    assert_eq!(report.fast_path_hits, 0);
    assert_eq!(report.changed, vec![id("a.txt")]);
    assert_eq!(builder.count_for(&id("a.txt")), 2);
}

#[test]
fn test_restart_verifies_and_reuses_cold_tier() {
    let project = chain();
    project.age_all(Duration::from_secs(120)).unwrap();
    let root = TempDir::new().unwrap();
    let sources = project.sources("txt").unwrap();

    {
        let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
        let mut indexer = IncrementalIndexer::new(&cache, ImportScanner::new());
        indexer.index(&sources).unwrap();
        indexer.save().unwrap();
        cache.flush().unwrap();
    }

    let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
    let builder = CountingBuilder::new(ImportScanner::new());
    let mut indexer = IncrementalIndexer::resume(&cache, &builder).unwrap();
    let report = indexer.index(&sources).unwrap();

    // Fast-path records do not survive a restart.
    assert_eq!(report.fast_path_hits, 0);
    assert_eq!(builder.count(), 0);
    assert_eq!(report.hits, 3);
    assert_eq!(cache.stats().cold_hits, 3);
}

#[test]
fn test_cycle_fails_only_the_batch() {
    let project = TempProject::new()
        .unwrap()
        .with_file("a.txt", "import b.txt\n")
        .unwrap()
        .with_file("b.txt", "import a.txt\n")
        .unwrap();
    let root = TempDir::new().unwrap();
    let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
    let mut indexer = IncrementalIndexer::new(&cache, ImportScanner::new());
    let sources = project.sources("txt").unwrap();

    match indexer.index(&sources) {
        Err(Error::Cycle(cycle)) => {
            assert!(cycle.contains(&id("a.txt")));
            assert!(cycle.contains(&id("b.txt")));
        }
        other => panic!("expected a cycle, got {other:?}"),
    }

    // Breaking the cycle lets the next batch through.
    project.write("b.txt", "leaf\n").unwrap();
    let report = indexer.index(&sources).unwrap();
    assert_eq!(report.order, vec![id("b.txt"), id("a.txt")]);
}

#[test]
fn test_failed_build_inserts_nothing() {
    let project = chain();
    let root = TempDir::new().unwrap();
    let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
    let builder = FailingBuilder::new(ImportScanner::new(), "b.txt");
    let mut indexer = IncrementalIndexer::new(&cache, builder);

    assert!(matches!(
        indexer.index(&project.sources("txt").unwrap()),
        Err(Error::Build { .. })
    ));
    assert_eq!(cache.stats().hot_entries, 0);
    assert!(indexer.graph().is_empty());
}

#[test]
fn test_deleted_dependency_rebuilds_dependents() {
    let project = chain();
    let root = TempDir::new().unwrap();
    let cache = TieredCache::open(root.path(), CacheConfig::default()).unwrap();
    let builder = CountingBuilder::new(ImportScanner::new());
    let mut indexer = IncrementalIndexer::new(&cache, &builder);
    indexer.index(&project.sources("txt").unwrap()).unwrap();

    project.remove("c.txt").unwrap();
    builder.reset();
    let report = indexer.index(&project.sources("txt").unwrap()).unwrap();

    assert_eq!(report.removed, vec![id("c.txt")]);
    assert_eq!(builder.built(), vec![id("a.txt"), id("b.txt")]);
    assert_eq!(report.scanned, 2);
}
