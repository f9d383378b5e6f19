//! Clear command implementation.

use crate::context::Context;
use crate::output::{self, json};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use tracing::info;

/// Arguments for the clear command.
#[derive(Args, Debug, Clone)]
pub struct ClearArgs {}

#[derive(Debug, Serialize)]
struct ClearOutput {
    root: String,
    cleared: bool,
}

/// Run the clear command.
pub fn run(_args: &ClearArgs, ctx: &Context) -> Result<()> {
    info!("running clear command");

    let cache = ctx.open_cache()?;
    cache.clear()?;

    if json::is_enabled() {
        return json::print(&ClearOutput {
            root: ctx.root().display().to_string(),
            cleared: true,
        });
    }
    output::success(&format!("cleared {}", ctx.root().display()));
    Ok(())
}
