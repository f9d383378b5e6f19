//! Verify command implementation.

use crate::context::Context;
use crate::output::{self, json};
use anyhow::Result;
use clap::Args;
use std::process::ExitCode;
use tracing::info;

/// Arguments for the verify command.
#[derive(Args, Debug, Clone)]
pub struct VerifyArgs {
    /// Exit successfully even when corrupt objects were found
    #[arg(long)]
    pub no_fail: bool,
}

/// Run the verify command.
///
/// Corrupt objects are removed as they are found, so a second run is clean.
pub fn run(args: &VerifyArgs, ctx: &Context) -> Result<ExitCode> {
    info!("running verify command");

    let cache = ctx.open_cache()?;
    let report = cache.verify()?;

    if json::is_enabled() {
        json::print(&report)?;
    } else if report.is_clean() {
        output::success(&format!("{} objects verified", report.checked));
    } else {
        output::warning(&format!(
            "{} of {} objects corrupt, {} missing; removed from the cache",
            report.corrupt, report.checked, report.missing
        ));
    }

    if report.is_clean() || args.no_fail {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
