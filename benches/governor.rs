use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use request_governor::{
    normalize, CacheConfig, CanonicalKey, LimiterConfig, Params, RequestDescriptor,
    SlidingWindowLimiter, SystemClock, TtlCache,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn params(n: usize) -> Params {
    let mut params = Params::new();
    params.insert("id".to_string(), json!(n));
    params.insert("owner_id".to_string(), json!("u-42"));
    params
}

/// Benchmark key normalization for each request shape
fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");

    let descriptors = [
        ("plain", RequestDescriptor::plain("contacts")),
        ("existence_check", RequestDescriptor::existence_check("business")),
        ("owner_scoped", RequestDescriptor::owner_scoped("sales")),
        ("unresolved", RequestDescriptor::unresolved()),
    ];

    for (name, descriptor) in &descriptors {
        group.bench_function(*name, |b| b.iter(|| normalize(black_box(descriptor))));
    }

    group.finish();
}

/// Benchmark admission decisions with varying numbers of tracked keys
fn bench_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("admission");
    group.throughput(Throughput::Elements(1));

    for keys in [1usize, 10, 100].iter() {
        // Wide limits so the breaker never trips mid-benchmark
        let config = LimiterConfig {
            window: Duration::from_millis(50),
            max_global: 1_000_000,
            max_per_key: 1_000_000,
            backoff: Duration::from_millis(1),
        };
        let limiter = SlidingWindowLimiter::new(config, Arc::new(SystemClock::new()));
        let tracked: Vec<CanonicalKey> = (0..*keys)
            .map(|i| CanonicalKey::new(format!("resource_{i}")))
            .collect();

        group.bench_with_input(BenchmarkId::new("check", keys), keys, |b, _| {
            let mut i = 0;
            b.iter(|| {
                let key = &tracked[i % tracked.len()];
                i += 1;
                black_box(limiter.check(key))
            })
        });

        group.bench_with_input(BenchmarkId::new("check_and_record", keys), keys, |b, _| {
            let mut i = 0;
            b.iter(|| {
                let key = &tracked[i % tracked.len()];
                i += 1;
                if limiter.can_admit(key) {
                    limiter.record(key);
                }
            })
        });
    }

    group.finish();
}

/// Benchmark cache reads and writes at different fill levels
fn bench_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("cache");

    for entries in [10usize, 100, 1000].iter() {
        let config = CacheConfig {
            max_entries: *entries,
            ..CacheConfig::default()
        };
        let cache: TtlCache<serde_json::Value> =
            TtlCache::new(&config, Arc::new(SystemClock::new()));
        for n in 0..*entries {
            cache.set("contacts", &params(n), json!({"id": n}));
        }

        group.bench_with_input(BenchmarkId::new("get_hit", entries), entries, |b, &n| {
            let mut i = 0;
            b.iter(|| {
                i += 1;
                black_box(cache.get("contacts", &params(i % n)))
            })
        });

        group.bench_with_input(BenchmarkId::new("get_miss", entries), entries, |b, _| {
            let missing = params(usize::MAX);
            b.iter(|| black_box(cache.get("contacts", &missing)))
        });

        // Every write past capacity evicts the oldest entry
        group.bench_with_input(BenchmarkId::new("set_evicting", entries), entries, |b, &n| {
            let mut i = n;
            b.iter(|| {
                i += 1;
                cache.set("contacts", &params(i), json!({"id": i}));
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_normalize, bench_admission, bench_cache);
criterion_main!(benches);
