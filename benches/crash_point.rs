//! Crash point derivation and clock throughput.

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use tokio::time::Instant;

use crash_round::core::rng::{SeedSource, SequenceSeedSource};
use crash_round::game::{CrashPointGenerator, GeneratorConfig, RoundClock};
use crash_round::{Multiplier, RoundId};

fn bench_generate(c: &mut Criterion) {
    let generator = CrashPointGenerator::new(GeneratorConfig::default());
    let mut seeds = SequenceSeedSource::new([1; 32]);
    let seed = seeds.next_seed();

    c.bench_function("crash_point_generate", |b| {
        b.iter(|| generator.generate(black_box(RoundId(42)), black_box(&seed)))
    });
}

fn bench_multiplier_at(c: &mut Criterion) {
    let clock = RoundClock::new(
        Duration::from_secs(15),
        Multiplier::from_hundredths(1_000),
        Duration::from_millis(100),
    );
    let start = Instant::now();

    let mut group = c.benchmark_group("multiplier_at");
    for elapsed_ms in [0u64, 7_500, 20_000] {
        let now = start + Duration::from_millis(elapsed_ms);
        group.bench_with_input(BenchmarkId::from_parameter(elapsed_ms), &now, |b, now| {
            b.iter(|| clock.multiplier_at(black_box(start), black_box(*now)))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_generate, bench_multiplier_at);
criterion_main!(benches);
