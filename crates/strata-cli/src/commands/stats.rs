//! Stats command implementation.

use crate::context::Context;
use crate::output::{self, json, table};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use strata_cache::{CacheStatsSnapshot, DiskUsage, format_bytes};
use tracing::info;

/// Arguments for the stats command.
#[derive(Args, Debug, Clone)]
pub struct StatsArgs {}

#[derive(Debug, Serialize)]
struct StatsOutput {
    root: String,
    stats: CacheStatsSnapshot,
    disk: DiskUsage,
}

/// Run the stats command.
pub fn run(_args: &StatsArgs, ctx: &Context) -> Result<()> {
    info!("running stats command");

    let cache = ctx.open_cache()?;
    let stats = cache.stats();
    let disk = cache.disk_usage()?;

    if json::is_enabled() {
        return json::print(&StatsOutput {
            root: ctx.root().display().to_string(),
            stats,
            disk,
        });
    }

    output::heading(&format!("cache at {}", ctx.root().display()));
    let rows = [
        ("Durable entries", disk.cold_entries.to_string()),
        ("Tombstones", disk.tombstones.to_string()),
        ("Object bytes", format_bytes(disk.cold_bytes)),
        ("Dedup objects", disk.dedup_objects.to_string()),
        ("Dedup bytes", format_bytes(disk.dedup_bytes)),
        ("Hot entries", stats.hot_entries.to_string()),
        ("Warm entries", stats.warm_entries.to_string()),
        ("Warm bytes", format_bytes(stats.warm_weighted_bytes)),
        ("Corruptions", stats.corruptions.to_string()),
    ];
    println!("{}", table::key_value(rows));
    Ok(())
}
