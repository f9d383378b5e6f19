//! Tiered, dependency-aware artifact cache.
//!
//! This crate provides the storage side of strata:
//!
//! - **Hot tier**: lock-free in-process map guarded by an atomic bloom filter,
//!   with a metadata fast path that answers "unchanged?" without hashing
//!
//! - **Warm tier**: bounded cache with size-aware admission and eviction using
//!   [moka](https://crates.io/crates/moka)
//!
//! - **Cold tier**: checksummed [rkyv](https://crates.io/crates/rkyv) objects on
//!   disk, indexed by an embedded [redb](https://crates.io/crates/redb) database,
//!   written atomically and read through memory maps
//!
//! - **Dedup store**: content-addressed copies shared by every artifact id
//!   with the same key fingerprint
//!
//! - **Durable writer**: one background thread behind a bounded queue, with a
//!   `flush` barrier and a configurable backpressure policy
//!
//! - **Sessions**: private write overlays merged into the shared tiers on commit
//!
//! - **Incremental indexer**: fingerprints sources, asks the dependency graph
//!   what went stale and rebuilds it in dependency order
//!
//! ## Cache Layout
//!
//! ```text
//! <root>/
//!   index.redb            key -> object checksum, tombstones
//!   objects/<aa>/<checksum>.art
//!   cas/<aa>/<fingerprint>.art
//!   graph.bin             dependency graph snapshot
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use strata_cache::{CacheConfig, TieredCache};
//! use strata_core::{ArtifactId, CacheEntry, CacheKey, ContentHash};
//!
//! # fn main() -> strata_core::Result<()> {
//! let cache = TieredCache::open("/tmp/strata", CacheConfig::default())?;
//!
//! let source = b"fn main() {}";
//! let hash = ContentHash::of(source);
//! let key = CacheKey::new(ArtifactId::new("src/main.rs", "rust"), hash);
//! cache.set(CacheEntry::new(key.clone(), b"ir".to_vec(), vec![], hash));
//!
//! assert!(cache.get(&key, None).is_some());
//! cache.flush()?;
//! println!("{}", cache.stats().format_summary());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(unsafe_code)] // Required for memmap2

mod bloom;
pub mod codec;
mod cold;
mod config;
mod dedup;
mod hot;
mod incremental;
mod index;
mod scanner;
mod session;
mod stats;
mod tiered;
mod warm;
mod writer;

pub use bloom::{AtomicBloomFilter, BloomFilterStats};
pub use cold::{ColdTier, GcReport, VerifyReport};
pub use config::{
    Backpressure, CacheConfig, CacheConfigBuilder, ENV_BACKPRESSURE, ENV_CACHE_DIR, ENV_DEDUP,
    ENV_WARM_MAX_BYTES, ENV_WARM_MAX_ENTRIES, ENV_WARM_TTL_SECS, ENV_WRITE_QUEUE_CAPACITY,
};
pub use dedup::DedupStore;
pub use hot::HotTier;
pub use incremental::{IncrementalIndexer, IndexReport};
pub use index::{CacheIndex, IndexRecord};
pub use scanner::ImportScanner;
pub use session::Session;
pub use stats::{CacheStats, CacheStatsSnapshot, Tier, TierCounters, format_bytes};
pub use tiered::{DiskUsage, TieredCache};
pub use warm::WarmTier;
pub use writer::DurableWriter;
