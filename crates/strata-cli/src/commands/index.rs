//! Index command implementation.

use crate::context::Context;
use crate::output::{self, format_duration, json, table};
use anyhow::{Context as _, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use strata_cache::{ImportScanner, IncrementalIndexer};
use strata_core::{ArtifactId, SourceFile};
use tracing::{debug, info};
use walkdir::{DirEntry, WalkDir};

/// Arguments for the index command.
#[derive(Args, Debug, Clone)]
pub struct IndexArgs {
    /// Source tree to index
    #[arg(default_value = ".", value_name = "DIR")]
    pub dir: PathBuf,

    /// Language tag recorded on every artifact
    #[arg(long, short = 'l', default_value = "text")]
    pub language: String,

    /// Only index files with these extensions (repeatable)
    #[arg(long = "ext", value_name = "EXT")]
    pub extensions: Vec<String>,
}

/// Run the index command.
pub fn run(args: &IndexArgs, ctx: &Context) -> Result<()> {
    info!(dir = %args.dir.display(), "running index command");

    let dir = args
        .dir
        .canonicalize()
        .with_context(|| format!("cannot read source tree {}", args.dir.display()))?;
    let sources = collect_sources(&dir, ctx.root(), args)?;
    debug!(count = sources.len(), "collected sources");

    let cache = ctx.open_cache()?;
    let mut indexer = IncrementalIndexer::resume(&cache, ImportScanner::new())?;
    let report = indexer.index(&sources)?;
    indexer.save()?;
    cache.flush()?;

    if json::is_enabled() {
        return json::print(&report);
    }

    output::heading(&format!("indexed {}", dir.display()));
    let rows = [
        ("Scanned", report.scanned.to_string()),
        ("Changed", report.changed.len().to_string()),
        ("Affected", report.affected.len().to_string()),
        ("Rebuilt", report.rebuilds().to_string()),
        ("Cache hits", report.hits.to_string()),
        ("Fast-path hits", report.fast_path_hits.to_string()),
        ("Removed", report.removed.len().to_string()),
        ("Time", format_duration(report.duration)),
    ];
    println!("{}", table::key_value(rows));
    for id in &report.built {
        println!("  rebuilt {id}");
    }
    Ok(())
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn wanted(path: &Path, extensions: &[String]) -> bool {
    extensions.is_empty()
        || path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|e| e.trim_start_matches('.') == ext))
}

/// Every regular file under `dir`, skipping hidden entries and the cache root.
/// Identifiers are paths relative to `dir`.
fn collect_sources(dir: &Path, cache_root: &Path, args: &IndexArgs) -> Result<Vec<SourceFile>> {
    let cache_root = cache_root.canonicalize().ok();
    let mut sources = Vec::new();

    let walker = WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !is_hidden(e) && cache_root.as_deref() != Some(e.path()));
    for entry in walker {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() || !wanted(entry.path(), &args.extensions) {
            continue;
        }
        let rel = entry.path().strip_prefix(dir).unwrap_or(entry.path());
        sources.push(SourceFile::new(
            ArtifactId::new(rel, args.language.as_str()),
            entry.path(),
        ));
    }
    Ok(sources)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_filter() {
        let exts = vec!["rs".to_string(), ".txt".to_string()];
        assert!(wanted(Path::new("a/b.rs"), &exts));
        assert!(wanted(Path::new("notes.txt"), &exts));
        assert!(!wanted(Path::new("Makefile"), &exts));
        assert!(wanted(Path::new("Makefile"), &[]));
    }
}
