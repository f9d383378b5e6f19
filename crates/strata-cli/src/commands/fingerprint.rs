//! Fingerprint command implementation.

use crate::output::{self, json, table};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::path::PathBuf;
use strata_core::FingerprintEngine;
use tracing::info;

/// Arguments for the fingerprint command.
#[derive(Args, Debug, Clone)]
pub struct FingerprintArgs {
    /// Files to fingerprint
    #[arg(required = true, value_name = "FILE")]
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Serialize)]
struct FileFingerprint {
    path: String,
    size: u64,
    mtime_secs: u64,
    mtime_nanos: u32,
    hash: String,
}

/// Run the fingerprint command. Does not touch the cache.
pub fn run(args: &FingerprintArgs) -> Result<()> {
    info!(files = args.files.len(), "running fingerprint command");

    let engine = FingerprintEngine::new();
    let mut results = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let (_, stamp, hash) = engine.read(path)?;
        results.push(FileFingerprint {
            path: path.display().to_string(),
            size: stamp.fast.size,
            mtime_secs: stamp.fast.mtime_secs,
            mtime_nanos: stamp.fast.mtime_nanos,
            hash: hash.to_hex(),
        });
    }

    if json::is_enabled() {
        return json::print(&results);
    }

    output::heading("fingerprints");
    let mut out = table::with_headers(["File", "Size", "Modified", "BLAKE3"]);
    for r in &results {
        out.add_row(vec![
            r.path.clone(),
            r.size.to_string(),
            format!("{}.{:09}", r.mtime_secs, r.mtime_nanos),
            r.hash.clone(),
        ]);
    }
    println!("{out}");
    Ok(())
}
