//! Lock-free Bloom filter guarding hot-tier lookups.
//!
//! - MurmurHash64A with double hashing for k hash functions
//! - Bits stored in `AtomicU64` words; inserts are a `fetch_or` per probe
//! - Fixed size: past capacity the false-positive rate climbs, but a key
//!   that was inserted is never reported absent
//!
//! There is no rebuild. Clearing bits while another thread inserts could
//! lose that insert, and a false negative would hide a live entry.

use std::f64::consts::LN_2;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// MurmurHash64A, seeded.
#[inline]
fn murmurhash64a(data: &[u8], seed: u64) -> u64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;

    let mut h: u64 = seed ^ (data.len() as u64).wrapping_mul(M);

    let mut chunks = data.chunks_exact(8);
    for chunk in &mut chunks {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(chunk);
        let mut k = u64::from_le_bytes(buf);

        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);

        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        for (i, &byte) in tail.iter().enumerate() {
            h ^= u64::from(byte) << (8 * i);
        }
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;

    h
}

/// Optimal number of hash functions for a target false-positive rate.
#[inline]
fn optimal_hash_count(fp_rate: f64) -> u32 {
    ((-fp_rate.ln() / LN_2).ceil() as u32).max(1)
}

/// Bits needed for `capacity` items at `fp_rate`.
#[inline]
fn required_bits(capacity: usize, fp_rate: f64) -> usize {
    let bits_per_item = -fp_rate.ln() / (LN_2 * LN_2);
    ((capacity as f64 * bits_per_item).ceil() as usize).max(64)
}

/// Concurrent Bloom filter. No false negatives.
#[derive(Debug)]
pub struct AtomicBloomFilter {
    words: Box<[AtomicU64]>,
    num_bits: u64,
    num_hashes: u32,
    inserted: AtomicUsize,
    capacity: usize,
    fp_rate: f64,
    hasher: ahash::RandomState,
}

impl AtomicBloomFilter {
    /// Create a filter sized for `capacity` items at `fp_rate`.
    #[must_use]
    pub fn new(capacity: usize, fp_rate: f64) -> Self {
        let num_words = required_bits(capacity.max(1), fp_rate).div_ceil(64);
        let words = (0..num_words).map(|_| AtomicU64::new(0)).collect();
        Self {
            words,
            num_bits: (num_words * 64) as u64,
            num_hashes: optimal_hash_count(fp_rate),
            inserted: AtomicUsize::new(0),
            capacity,
            fp_rate,
            hasher: ahash::RandomState::with_seeds(
                0x5354_5241_5441_0001,
                0x5354_5241_5441_0002,
                0x5354_5241_5441_0003,
                0x5354_5241_5441_0004,
            ),
        }
    }

    #[inline]
    fn probes<T: Hash + ?Sized>(&self, item: &T) -> impl Iterator<Item = (usize, u64)> + '_ {
        let pre = self.hasher.hash_one(item).to_le_bytes();
        let hash = murmurhash64a(&pre, 0);
        let h1 = hash >> 32;
        let h2 = hash & 0xffff_ffff;
        let num_bits = self.num_bits;
        (0..u64::from(self.num_hashes)).map(move |i| {
            // Double hashing: h(i) = h1 + i * h2
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % num_bits;
            ((bit / 64) as usize, 1u64 << (bit % 64))
        })
    }

    /// Insert an item. Returns true if at least one bit was newly set.
    pub fn insert<T: Hash + ?Sized>(&self, item: &T) -> bool {
        let mut fresh = false;
        for (word, mask) in self.probes(item) {
            let prev = self.words[word].fetch_or(mask, Ordering::Release);
            fresh |= prev & mask == 0;
        }
        if fresh {
            self.inserted.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Whether the item may have been inserted.
    #[must_use]
    pub fn may_contain<T: Hash + ?Sized>(&self, item: &T) -> bool {
        self.probes(item)
            .all(|(word, mask)| self.words[word].load(Ordering::Acquire) & mask != 0)
    }

    /// Approximate number of distinct items inserted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inserted.load(Ordering::Relaxed)
    }

    /// Whether nothing has been inserted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reset every bit.
    ///
    /// Only safe when no other thread relies on a concurrent insert being
    /// visible afterwards; the hot tier calls it while clearing its map.
    pub fn clear(&self) {
        for word in &*self.words {
            word.store(0, Ordering::Release);
        }
        self.inserted.store(0, Ordering::Relaxed);
    }

    /// Get statistics.
    #[must_use]
    pub fn stats(&self) -> BloomFilterStats {
        let bits_set: u64 = self
            .words
            .iter()
            .map(|w| u64::from(w.load(Ordering::Relaxed).count_ones()))
            .sum();
        let fill = bits_set as f64 / self.num_bits as f64;
        BloomFilterStats {
            count: self.len(),
            capacity: self.capacity,
            num_bits: self.num_bits,
            num_hashes: self.num_hashes,
            memory_bytes: self.words.len() * 8,
            target_fp_rate: self.fp_rate,
            estimated_fp_rate: fill.powi(self.num_hashes as i32),
        }
    }
}

/// Bloom filter statistics.
#[derive(Debug, Clone)]
pub struct BloomFilterStats {
    /// Approximate number of items inserted.
    pub count: usize,
    /// Configured capacity.
    pub capacity: usize,
    /// Number of bits.
    pub num_bits: u64,
    /// Number of hash functions.
    pub num_hashes: u32,
    /// Memory usage in bytes.
    pub memory_bytes: usize,
    /// Configured false positive rate.
    pub target_fp_rate: f64,
    /// False positive rate estimated from the current fill.
    pub estimated_fp_rate: f64,
}
