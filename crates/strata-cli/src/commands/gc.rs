//! Gc command implementation.

use crate::context::Context;
use crate::output::{self, json};
use anyhow::Result;
use clap::Args;
use strata_cache::format_bytes;
use tracing::info;

/// Arguments for the gc command.
#[derive(Args, Debug, Clone)]
pub struct GcArgs {}

/// Run the gc command.
pub fn run(_args: &GcArgs, ctx: &Context) -> Result<()> {
    info!("running gc command");

    let cache = ctx.open_cache()?;
    let report = cache.gc()?;

    if json::is_enabled() {
        return json::print(&report);
    }
    output::success(&format!(
        "removed {} tombstones and {} objects, freed {}",
        report.tombstones_removed,
        report.objects_removed,
        format_bytes(report.bytes_freed)
    ));
    Ok(())
}
