//! Error types for strata operations.
//!
//! Each error carries:
//! - A stable error code (e.g., S0202) for searching logs and docs
//! - A message describing what went wrong
//! - Suggestions an operator can act on
//!
//! The cache itself degrades to misses on storage failures; only source-read,
//! build and dependency-cycle errors are expected to reach callers.

use crate::id::ArtifactId;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Error codes for strata errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Source errors (S01xx)
    /// Source file not found
    S0101,
    /// Source file unreadable
    S0102,

    // Cache storage errors (S02xx)
    /// Cache storage I/O failed
    S0201,
    /// Stored artifact failed checksum validation
    S0202,
    /// Artifact could not be encoded or decoded
    S0203,
    /// Cache index operation failed
    S0204,

    // Graph errors (S03xx)
    /// Dependency cycle prevents a build order
    S0301,

    // Configuration errors (S04xx)
    /// Invalid configuration value
    S0401,

    // Build errors (S05xx)
    /// Artifact builder failed
    S0501,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::S0101 => "S0101",
            Self::S0102 => "S0102",
            Self::S0201 => "S0201",
            Self::S0202 => "S0202",
            Self::S0203 => "S0203",
            Self::S0204 => "S0204",
            Self::S0301 => "S0301",
            Self::S0401 => "S0401",
            Self::S0501 => "S0501",
        }
    }

    /// Get a brief title for this error code.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::S0101 => "Source not found",
            Self::S0102 => "Source unreadable",
            Self::S0201 => "Cache I/O failure",
            Self::S0202 => "Cache corruption",
            Self::S0203 => "Serialization failure",
            Self::S0204 => "Index failure",
            Self::S0301 => "Dependency cycle",
            Self::S0401 => "Invalid configuration",
            Self::S0501 => "Build failed",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dependency cycle that makes a topological build order impossible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("dependency cycle: {}", format_cycle(.cycle))]
pub struct CycleError {
    /// Artifacts on the cycle, in edge order. The first artifact is repeated
    /// implicitly at the end.
    pub cycle: Vec<ArtifactId>,
}

impl CycleError {
    /// Create a cycle error from the artifacts on the cycle.
    #[must_use]
    pub fn new(cycle: Vec<ArtifactId>) -> Self {
        Self { cycle }
    }

    /// Check whether the given artifact participates in the cycle.
    #[must_use]
    pub fn contains(&self, id: &ArtifactId) -> bool {
        self.cycle.contains(id)
    }
}

fn format_cycle(cycle: &[ArtifactId]) -> String {
    let mut parts: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    if let Some(first) = cycle.first() {
        parts.push(first.to_string());
    }
    parts.join(" -> ")
}

/// Main error type for strata.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Source file or artifact does not exist.
    #[error("[S0101] not found: {}", path.display())]
    NotFound {
        /// Path that was not found.
        path: PathBuf,
    },

    /// I/O failure on a source file or on cache storage.
    #[error("[{code}] io error at {}: {message}", path.display())]
    Io {
        /// Error code (`S0102` for sources, `S0201` for cache storage).
        code: ErrorCode,
        /// Path involved.
        path: PathBuf,
        /// Underlying error message.
        message: String,
        /// Underlying error kind.
        kind: std::io::ErrorKind,
    },

    /// Stored bytes failed checksum validation.
    #[error("[S0202] corrupt cache object {}: expected {expected}, got {actual}", path.display())]
    Corruption {
        /// Offending file.
        path: PathBuf,
        /// Checksum recorded alongside the payload.
        expected: String,
        /// Checksum computed from the payload.
        actual: String,
    },

    /// Dependency cycle.
    #[error("[S0301] {0}")]
    Cycle(#[from] CycleError),

    /// Encoding or decoding failure.
    #[error("[S0203] serialization error: {message}")]
    Serialization {
        /// Error message.
        message: String,
    },

    /// Embedded index failure.
    #[error("[S0204] index error: {message}")]
    Index {
        /// Error message.
        message: String,
    },

    /// Configuration error.
    #[error("[S0401] config error: {message}")]
    Config {
        /// Configuration key, when known.
        key: Option<String>,
        /// Error message.
        message: String,
    },

    /// Artifact builder failure.
    #[error("[S0501] failed to build {id}: {message}")]
    Build {
        /// Artifact being built.
        id: ArtifactId,
        /// Error message.
        message: String,
    },
}

impl Error {
    /// Get the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound { .. } => ErrorCode::S0101,
            Self::Io { code, .. } => *code,
            Self::Corruption { .. } => ErrorCode::S0202,
            Self::Cycle(_) => ErrorCode::S0301,
            Self::Serialization { .. } => ErrorCode::S0203,
            Self::Index { .. } => ErrorCode::S0204,
            Self::Config { .. } => ErrorCode::S0401,
            Self::Build { .. } => ErrorCode::S0501,
        }
    }

    /// Get suggestions for fixing this error.
    #[must_use]
    pub fn suggestions(&self) -> Vec<String> {
        match self {
            Self::NotFound { path } => vec![
                format!("Check that {} still exists", path.display()),
                "Purge orphaned artifacts after deleting sources".to_string(),
            ],
            Self::Io { path, kind, .. } => match kind {
                std::io::ErrorKind::PermissionDenied => vec![
                    format!("Check permissions on: {}", path.display()),
                    "Point STRATA_CACHE_DIR at a writable directory".to_string(),
                ],
                _ => vec![format!("Check the file: {}", path.display())],
            },
            Self::Corruption { .. } => vec![
                "The object was removed; it will be rebuilt on next access".to_string(),
                "Run `strata verify` to scan the whole cache".to_string(),
            ],
            Self::Cycle(err) => vec![format!(
                "Break the cycle between {} artifacts",
                err.cycle.len()
            )],
            Self::Serialization { .. } | Self::Index { .. } => {
                vec!["Run `strata clear` to rebuild the cache from scratch".to_string()]
            }
            Self::Config { key, .. } => key
                .as_ref()
                .map(|k| vec![format!("Check the value of '{k}'")])
                .unwrap_or_default(),
            Self::Build { .. } => Vec::new(),
        }
    }

    /// Create an error for a failed source read.
    ///
    /// `NotFound` is surfaced as [`Error::NotFound`] so callers can tell a
    /// deleted source apart from an unreadable one.
    #[must_use]
    #[allow(clippy::needless_pass_by_value)]
    pub fn io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        let path = path.into();
        if err.kind() == std::io::ErrorKind::NotFound {
            return Self::NotFound { path };
        }
        Self::Io {
            code: ErrorCode::S0102,
            path,
            message: err.to_string(),
            kind: err.kind(),
        }
    }

    /// Create an error for a failed cache storage operation.
    #[must_use]
    #[allow(clippy::needless_pass_by_value)]
    pub fn storage(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        Self::Io {
            code: ErrorCode::S0201,
            path: path.into(),
            message: err.to_string(),
            kind: err.kind(),
        }
    }

    /// Create a serialization error.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Create an index error.
    #[must_use]
    pub fn index(message: impl Into<String>) -> Self {
        Self::Index {
            message: message.into(),
        }
    }

    /// Create a configuration error for a specific key.
    #[must_use]
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: Some(key.into()),
            message: message.into(),
        }
    }

    /// Create a build error.
    #[must_use]
    pub fn build(id: ArtifactId, message: impl Into<String>) -> Self {
        Self::Build {
            id,
            message: message.into(),
        }
    }

    /// Whether this error means the source is gone rather than broken.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Format the error with its suggestions, one per line.
    #[must_use]
    pub fn display_with_suggestions(&self) -> String {
        let mut out = self.to_string();
        for suggestion in self.suggestions() {
            out.push_str("\n  help: ");
            out.push_str(&suggestion);
        }
        out
    }
}

/// Result type alias for strata operations.
pub type Result<T> = std::result::Result<T, Error>;
