//! Core types for the strata artifact cache.
//!
//! This crate provides the vocabulary shared by every other strata crate:
//! - Artifact identifiers (`ArtifactId`)
//! - Fast (metadata) and full (content) fingerprints
//! - Immutable cache keys and shared cache entries
//! - The error taxonomy used across the cache
//! - The [`ArtifactBuilder`] interface implemented by artifact producers

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod builder;
mod entry;
pub mod error;
mod fingerprint;
mod id;
mod key;

pub use builder::{ArtifactBuilder, BuildOutput, SourceFile};
pub use entry::{CacheEntry, ColdLocation, SharedEntry};
pub use error::{CycleError, Error, ErrorCode, Result};
pub use fingerprint::{
    ContentHash, FastFingerprint, Fingerprint, FingerprintEngine, SourceStamp,
};
pub use id::ArtifactId;
pub use key::CacheKey;

/// Seconds since the Unix epoch, saturating at zero for clocks set before 1970.
#[must_use]
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

