//! strata CLI - inspect and drive the tiered artifact cache.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod commands;
mod context;
mod output;

use clap::Parser;
use commands::{Cli, Commands};
use context::Context;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    let log_level = match cli.verbose {
        0 if cli.quiet => Level::ERROR,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    // Enable JSON output if requested
    if matches!(cli.format, commands::OutputFormat::Json) {
        output::json::enable();
    }

    let result = run_command(&cli);

    match result {
        Ok(code) => code,
        Err(e) => {
            output::json::print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn run_command(cli: &Cli) -> anyhow::Result<ExitCode> {
    // Fingerprinting never opens the cache.
    if let Commands::Fingerprint(args) = &cli.command {
        commands::fingerprint::run(args)?;
        return Ok(ExitCode::SUCCESS);
    }

    let ctx = Context::new(&cli.to_context_args())?;
    match &cli.command {
        Commands::Index(args) => commands::index::run(args, &ctx)?,
        Commands::Stats(args) => commands::stats::run(args, &ctx)?,
        Commands::Verify(args) => return commands::verify::run(args, &ctx),
        Commands::Gc(args) => commands::gc::run(args, &ctx)?,
        Commands::Clear(args) => commands::clear::run(args, &ctx)?,
        Commands::Fingerprint(_) => {}
    }
    Ok(ExitCode::SUCCESS)
}
