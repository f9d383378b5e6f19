//! Benchmarks for the cache tiers.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use strata_cache::{AtomicBloomFilter, CacheConfig, HotTier, TieredCache, codec};
use strata_core::{ArtifactId, CacheEntry, CacheKey, ContentHash, FingerprintEngine};
use std::time::Duration;

fn entry(n: usize, size: usize) -> CacheEntry {
    let payload = vec![(n % 251) as u8; size];
    let hash = ContentHash::of(&payload);
    CacheEntry::new(
        CacheKey::new(ArtifactId::new(format!("src/f{n}.rs"), "rust"), hash),
        payload,
        vec![],
        hash,
    )
}

fn bench_bloom_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("bloom_filter");

    for size in [1_000, 10_000, 100_000] {
        let filter = AtomicBloomFilter::new(size, 0.01);
        for i in 0..size {
            filter.insert(&i);
        }

        group.bench_with_input(BenchmarkId::new("lookup_hit", size), &size, |b, _| {
            b.iter(|| {
                for i in 0..100 {
                    black_box(filter.may_contain(&i));
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("lookup_miss", size), &size, |b, &size| {
            b.iter(|| {
                for i in size..(size + 100) {
                    black_box(filter.may_contain(&i));
                }
            });
        });
    }

    group.finish();
}

fn bench_hot_tier(c: &mut Criterion) {
    let mut group = c.benchmark_group("hot_tier");
    let hot = HotTier::new(100_000, 0.01, Duration::from_secs(2));
    let entries: Vec<_> = (0..1000).map(|n| entry(n, 1024).shared()).collect();
    for e in &entries {
        hot.insert(e.clone());
    }
    let missing = entry(5000, 1024);

    group.throughput(Throughput::Elements(1));
    group.bench_function("get_hit", |b| {
        b.iter(|| black_box(hot.get(entries[500].key())));
    });
    group.bench_function("get_miss", |b| {
        b.iter(|| black_box(hot.get(missing.key())));
    });

    group.finish();
}

fn bench_fingerprint(c: &mut Criterion) {
    let mut group = c.benchmark_group("fingerprint");
    let engine = FingerprintEngine::new();

    for size in [1024, 64 * 1024, 1024 * 1024] {
        let data = vec![0xabu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("full", size), &data, |b, data| {
            b.iter(|| black_box(engine.full(data)));
        });
    }

    group.finish();
}

fn bench_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("codec");

    for size in [1024, 64 * 1024] {
        let artifact = codec::StoredArtifact::from_entry(&entry(1, size));
        let (bytes, _) = codec::encode(&artifact).unwrap();
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("encode", size), &artifact, |b, artifact| {
            b.iter(|| black_box(codec::encode(artifact).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("decode", size), &bytes, |b, bytes| {
            b.iter(|| black_box(codec::decode(bytes, std::path::Path::new("bench.art")).unwrap()));
        });
    }

    group.finish();
}

fn bench_tiered_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("tiered_cache");
    let dir = tempfile::tempdir().unwrap();
    let cache = TieredCache::open(dir.path(), CacheConfig::default()).unwrap();

    let entries: Vec<_> = (0..1000).map(|n| cache.set(entry(n, 1024))).collect();
    cache.flush().unwrap();

    group.throughput(Throughput::Elements(1));
    group.bench_function("get_hot", |b| {
        b.iter(|| black_box(cache.get(entries[500].key(), None)));
    });

    group.bench_function("set", |b| {
        let mut n = 10_000usize;
        b.iter(|| {
            cache.set(entry(n, 1024));
            n += 1;
        });
    });

    group.finish();
    cache.flush().unwrap();
}

criterion_group!(
    benches,
    bench_bloom_filter,
    bench_hot_tier,
    bench_fingerprint,
    bench_codec,
    bench_tiered_cache,
);
criterion_main!(benches);
