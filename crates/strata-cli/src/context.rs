//! Shared state for command execution.

use anyhow::{Context as _, Result};
use std::fmt;
use std::path::PathBuf;
use strata_cache::{CacheConfig, TieredCache};
use tracing::debug;

/// Global arguments that affect how the cache is opened.
#[derive(Debug, Clone, Default)]
pub struct ContextArgs {
    /// Overrides the configured cache root.
    pub cache_dir: Option<PathBuf>,
    /// Optional JSON configuration file.
    pub config: Option<PathBuf>,
}

/// Resolved configuration shared by every command.
pub struct Context {
    config: CacheConfig,
    root: PathBuf,
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Resolve configuration: defaults, then the config file, then the
    /// environment, then `--cache-dir`.
    pub fn new(args: &ContextArgs) -> Result<Self> {
        let mut config = CacheConfig::load(args.config.as_deref())?;
        if let Some(dir) = &args.cache_dir {
            config.root = Some(dir.clone());
        }
        let config = config.validate()?;
        let root = config.resolve_root()?;
        debug!(root = %root.display(), "resolved cache root");
        Ok(Self { config, root })
    }

    /// Cache root directory.
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Open the cache at the resolved root.
    pub fn open_cache(&self) -> Result<TieredCache> {
        TieredCache::open(&self.root, self.config.clone())
            .with_context(|| format!("failed to open cache at {}", self.root.display()))
    }
}
