//! Cache configuration.
//!
//! Values are layered, later sources overriding earlier ones:
//! defaults, a JSON config file, `STRATA_*` environment variables, and
//! finally whatever the caller sets through [`CacheConfigBuilder`].

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strata_core::{Error, Result};

/// Environment variable overriding the cache root.
pub const ENV_CACHE_DIR: &str = "STRATA_CACHE_DIR";
/// Environment variable overriding the warm tier entry cap.
pub const ENV_WARM_MAX_ENTRIES: &str = "STRATA_WARM_MAX_ENTRIES";
/// Environment variable overriding the warm tier byte cap.
pub const ENV_WARM_MAX_BYTES: &str = "STRATA_WARM_MAX_BYTES";
/// Environment variable overriding the warm tier TTL, in seconds.
pub const ENV_WARM_TTL_SECS: &str = "STRATA_WARM_TTL_SECS";
/// Environment variable overriding the durable-write queue capacity.
pub const ENV_WRITE_QUEUE_CAPACITY: &str = "STRATA_WRITE_QUEUE_CAPACITY";
/// Environment variable selecting the backpressure policy (`block` or `drop`).
pub const ENV_BACKPRESSURE: &str = "STRATA_BACKPRESSURE";
/// Environment variable enabling the dedup store (`1`/`true`/`0`/`false`).
pub const ENV_DEDUP: &str = "STRATA_DEDUP";

/// What `set` does when the durable-write queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// Block the caller until the writer catches up.
    #[default]
    Block,
    /// Drop the durable write and log it. The entry stays in memory.
    #[serde(alias = "drop")]
    DropAndLog,
}

impl Backpressure {
    /// Parse `block`, `drop` or `drop_and_log`.
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "block" => Ok(Self::Block),
            "drop" | "drop_and_log" | "drop-and-log" => Ok(Self::DropAndLog),
            other => Err(Error::config(
                ENV_BACKPRESSURE,
                format!("unknown backpressure policy '{other}', expected block or drop"),
            )),
        }
    }

    /// Canonical name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::DropAndLog => "drop",
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Root directory for persistent state. `None` uses the platform cache dir.
    pub root: Option<PathBuf>,

    /// Warm tier entry cap (default: 10,000).
    pub warm_max_entries: u64,

    /// Warm tier weighted size cap in bytes (default: 256MB).
    pub warm_max_bytes: u64,

    /// Warm tier time-to-live (default: 1 hour).
    pub warm_ttl: Duration,

    /// Durable-write queue capacity (default: 1024).
    pub write_queue_capacity: usize,

    /// Behaviour when the durable-write queue is full.
    pub backpressure: Backpressure,

    /// Keep a content-addressed copy of every artifact under `cas/`.
    pub dedup_enabled: bool,

    /// Expected number of hot-tier keys, for filter sizing.
    pub filter_capacity: usize,

    /// Target false-positive rate of the hot-tier filter.
    pub filter_fp_rate: f64,

    /// Minimum age of an mtime, at observation time, for the fast path to
    /// trust it.
    pub racy_window: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: None,
            warm_max_entries: 10_000,
            warm_max_bytes: 256 * 1024 * 1024,  // 256MB
            warm_ttl: Duration::from_secs(3600), // 1 hour
            write_queue_capacity: 1024,
            backpressure: Backpressure::Block,
            dedup_enabled: true,
            filter_capacity: 100_000,
            filter_fp_rate: 0.01,
            racy_window: Duration::from_secs(2),
        }
    }
}

/// On-disk representation: every field optional so a file can override a
/// subset of the defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    root: Option<PathBuf>,
    warm_max_entries: Option<u64>,
    warm_max_bytes: Option<u64>,
    warm_ttl_secs: Option<u64>,
    write_queue_capacity: Option<usize>,
    backpressure: Option<Backpressure>,
    dedup_enabled: Option<bool>,
    filter_capacity: Option<usize>,
    filter_fp_rate: Option<f64>,
    racy_window_ms: Option<u64>,
}

impl CacheConfig {
    /// Create a new cache configuration builder.
    #[must_use]
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::default()
    }

    /// Defaults, overridden by the optional JSON file, overridden by the
    /// environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(path) = file {
            config = config.merge_file(path)?;
        }
        config.merge_env(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by the JSON file at `path`, ignoring the environment.
    pub fn from_file(path: &Path) -> Result<Self> {
        Self::default().merge_file(path)
    }

    /// Overlay the fields present in the JSON file at `path`.
    pub fn merge_file(self, path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        self.merge_json(&text)
            .map_err(|e| Error::config(path.display().to_string(), e.to_string()))
    }

    /// Overlay the fields present in a JSON document.
    pub fn merge_json(mut self, text: &str) -> Result<Self> {
        let file: ConfigFile = sonic_rs::from_str(text)
            .map_err(|e| Error::config("config", format!("invalid config file: {e}")))?;

        if let Some(v) = file.root {
            self.root = Some(v);
        }
        if let Some(v) = file.warm_max_entries {
            self.warm_max_entries = v;
        }
        if let Some(v) = file.warm_max_bytes {
            self.warm_max_bytes = v;
        }
        if let Some(v) = file.warm_ttl_secs {
            self.warm_ttl = Duration::from_secs(v);
        }
        if let Some(v) = file.write_queue_capacity {
            self.write_queue_capacity = v;
        }
        if let Some(v) = file.backpressure {
            self.backpressure = v;
        }
        if let Some(v) = file.dedup_enabled {
            self.dedup_enabled = v;
        }
        if let Some(v) = file.filter_capacity {
            self.filter_capacity = v;
        }
        if let Some(v) = file.filter_fp_rate {
            self.filter_fp_rate = v;
        }
        if let Some(v) = file.racy_window_ms {
            self.racy_window = Duration::from_millis(v);
        }
        self.validate()
    }

    /// Overlay `STRATA_*` variables read through `lookup`.
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.root = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup(ENV_WARM_MAX_ENTRIES) {
            self.warm_max_entries = parse_number(ENV_WARM_MAX_ENTRIES, &v)?;
        }
        if let Some(v) = lookup(ENV_WARM_MAX_BYTES) {
            self.warm_max_bytes = parse_number(ENV_WARM_MAX_BYTES, &v)?;
        }
        if let Some(v) = lookup(ENV_WARM_TTL_SECS) {
            self.warm_ttl = Duration::from_secs(parse_number(ENV_WARM_TTL_SECS, &v)?);
        }
        if let Some(v) = lookup(ENV_WRITE_QUEUE_CAPACITY) {
            self.write_queue_capacity = parse_number(ENV_WRITE_QUEUE_CAPACITY, &v)?;
        }
        if let Some(v) = lookup(ENV_BACKPRESSURE) {
            self.backpressure = Backpressure::parse(&v)?;
        }
        if let Some(v) = lookup(ENV_DEDUP) {
            self.dedup_enabled = parse_bool(ENV_DEDUP, &v)?;
        }
        self.validate()
    }

    /// Reject values the cache cannot run with.
    pub fn validate(self) -> Result<Self> {
        if self.warm_max_entries == 0 {
            return Err(Error::config("warm_max_entries", "must be at least 1"));
        }
        if self.warm_max_bytes == 0 {
            return Err(Error::config("warm_max_bytes", "must be at least 1"));
        }
        if self.write_queue_capacity == 0 {
            return Err(Error::config("write_queue_capacity", "must be at least 1"));
        }
        if !(self.filter_fp_rate > 0.0 && self.filter_fp_rate < 1.0) {
            return Err(Error::config(
                "filter_fp_rate",
                format!("must be between 0 and 1, got {}", self.filter_fp_rate),
            ));
        }
        Ok(self)
    }

    /// The configured root, or the platform cache directory.
    pub fn resolve_root(&self) -> Result<PathBuf> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        directories::ProjectDirs::from("dev", "strata", "strata")
            .map(|dirs| dirs.cache_dir().to_path_buf())
            .ok_or_else(|| {
                Error::config(
                    ENV_CACHE_DIR,
                    "no home directory found; set STRATA_CACHE_DIR or --cache-dir",
                )
            })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| Error::config(key, format!("invalid number '{value}': {e}")))
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::config(key, format!("invalid boolean '{other}'"))),
    }
}

/// Builder for cache configuration.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    config: CacheConfig,
}

impl CacheConfigBuilder {
    /// Start from an existing configuration.
    #[must_use]
    pub const fn from_config(config: CacheConfig) -> Self {
        Self { config }
    }

    /// Set the cache root directory.
    #[must_use]
    pub fn root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.root = Some(root.into());
        self
    }

    /// Set the warm tier entry cap.
    #[must_use]
    pub fn warm_max_entries(mut self, max: u64) -> Self {
        self.config.warm_max_entries = max;
        self
    }

    /// Set the warm tier byte cap.
    #[must_use]
    pub fn warm_max_bytes(mut self, max: u64) -> Self {
        self.config.warm_max_bytes = max;
        self
    }

    /// Set the warm tier time-to-live.
    #[must_use]
    pub fn warm_ttl(mut self, ttl: Duration) -> Self {
        self.config.warm_ttl = ttl;
        self
    }

    /// Set the durable-write queue capacity.
    #[must_use]
    pub fn write_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.write_queue_capacity = capacity;
        self
    }

    /// Set the backpressure policy.
    #[must_use]
    pub fn backpressure(mut self, policy: Backpressure) -> Self {
        self.config.backpressure = policy;
        self
    }

    /// Enable or disable the dedup store.
    #[must_use]
    pub fn dedup_enabled(mut self, enabled: bool) -> Self {
        self.config.dedup_enabled = enabled;
        self
    }

    /// Set the hot-tier filter capacity.
    #[must_use]
    pub fn filter_capacity(mut self, capacity: usize) -> Self {
        self.config.filter_capacity = capacity;
        self
    }

    /// Set the hot-tier filter false-positive rate.
    #[must_use]
    pub fn filter_fp_rate(mut self, rate: f64) -> Self {
        self.config.filter_fp_rate = rate;
        self
    }

    /// Set the fast-path racy window.
    #[must_use]
    pub fn racy_window(mut self, window: Duration) -> Self {
        self.config.racy_window = window;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<CacheConfig> {
        self.config.validate()
    }
}
