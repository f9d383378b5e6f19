//! CLI commands for strata.

pub mod clear;
pub mod fingerprint;
pub mod gc;
pub mod index;
pub mod stats;
pub mod verify;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// strata - a tiered, dependency-aware artifact cache
///
/// Keeps analysis artifacts in memory, in a bounded warm tier and on disk,
/// and rebuilds exactly the artifacts whose inputs changed.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author = "Strata Contributors")]
#[command(version)]
#[command(about = "Tiered, dependency-aware artifact cache", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
#[command(styles = get_styles())]
pub struct Cli {
    /// Do not output any message
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Cache root directory
    #[arg(long, global = true, value_name = "DIR", env = "STRATA_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Increase the verbosity of messages: -v for info, -vv for debug, -vvv for trace
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Convert to context args
    pub fn to_context_args(&self) -> crate::context::ContextArgs {
        crate::context::ContextArgs {
            cache_dir: self.cache_dir.clone(),
            config: self.config.clone(),
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index a source tree, rebuilding only what changed
    Index(index::IndexArgs),

    /// Print the fast and full fingerprints of a file
    #[command(alias = "fp")]
    Fingerprint(fingerprint::FingerprintArgs),

    /// Show cache statistics and disk usage
    Stats(stats::StatsArgs),

    /// Check every stored object against its recorded digest
    Verify(verify::VerifyArgs),

    /// Drop tombstoned entries and unreferenced objects
    Gc(gc::GcArgs),

    /// Remove every cached artifact
    Clear(clear::ClearArgs),
}

/// Output format for commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON
    Json,
}

const fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Green.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Green.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default())
        .placeholder(clap::builder::styling::AnsiColor::Yellow.on_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["strata", "stats", "--format", "json", "-vv"]).unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.command, Commands::Stats(_)));
    }
}
