//! Benchmark for tier selection.
//!
//! Run with: cargo bench --package tiervault_store --bench allocation_benchmark

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tiervault_store::{AllocationEngine, LotteryConfig, TierCounts};

fn full_stock() -> TierCounts {
    TierCounts::from_parts(50, 200, 750, 100)
}

fn benchmark_single_decision(c: &mut Criterion) {
    let config = LotteryConfig::default();
    let engine = AllocationEngine::new(&config);
    let stock = full_stock();
    let mut rng = ChaCha20Rng::seed_from_u64(7);

    c.bench_function("single_tier_decision", |b| {
        let mut pity = 0u32;
        b.iter(|| {
            pity = (pity + 1) % 12;
            black_box(engine.decide(black_box(&stock), black_box(pity), &mut rng))
        });
    });
}

fn benchmark_million_decisions(c: &mut Criterion) {
    let config = LotteryConfig::default();
    let engine = AllocationEngine::new(&config);
    let stock = full_stock();
    let mut rng = ChaCha20Rng::seed_from_u64(11);

    let mut group = c.benchmark_group("million_decisions");
    group.throughput(Throughput::Elements(1_000_000));
    group.sample_size(10);

    group.bench_function("1M_decisions", |b| {
        b.iter(|| {
            for _ in 0..1_000_000u32 {
                black_box(engine.decide(&stock, 0, &mut rng));
            }
        });
    });

    group.finish();
}

fn benchmark_statistics(c: &mut Criterion) {
    let config = LotteryConfig::default();
    let engine = AllocationEngine::new(&config);
    let stock = full_stock();
    let mut rng = ChaCha20Rng::seed_from_u64(13);

    c.bench_function("statistics_100k", |b| {
        b.iter(|| black_box(engine.run_statistics(black_box(&stock), black_box(100_000), &mut rng)));
    });
}

criterion_group!(
    benches,
    benchmark_single_decision,
    benchmark_million_decisions,
    benchmark_statistics
);
criterion_main!(benches);
