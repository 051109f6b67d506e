//! Criterion benchmarks for the MSD radix sort used to order a record
//! page by fingerprint before it is written (spec §4.4).

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use vdo_core::primitives::radix_sort::sort_indices;

fn random_keys(count: usize, seed: u64) -> Vec<[u8; 16]> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count)
        .map(|_| {
            let mut key = [0u8; 16];
            rng.fill(&mut key);
            key
        })
        .collect()
}

fn bench_sort_random(c: &mut Criterion) {
    let mut group = c.benchmark_group("radix_sort_random_keys");
    for &count in &[128usize, 2_048, 65_536] {
        let keys = random_keys(count, 11);
        group.bench_with_input(BenchmarkId::from_parameter(count), &keys, |b, keys| {
            b.iter_batched(
                || (0..keys.len() as u32).collect::<Vec<u32>>(),
                |mut indices| {
                    sort_indices(&mut indices, 16, |i| keys[i as usize]);
                    black_box(indices)
                },
                criterion::BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

fn bench_sort_adversarial_duplicates(c: &mut Criterion) {
    let keys: Vec<[u8; 16]> = (0..4_096).map(|_| [0u8; 16]).collect();
    let mut group = c.benchmark_group("radix_sort_all_equal_keys");
    group.bench_function("4096_duplicates", |b| {
        b.iter_batched(
            || (0..keys.len() as u32).collect::<Vec<u32>>(),
            |mut indices| {
                sort_indices(&mut indices, 16, |i| keys[i as usize]);
                black_box(indices)
            },
            criterion::BatchSize::SmallInput,
        );
    });
    group.finish();
}

criterion_group!(benches, bench_sort_random, bench_sort_adversarial_duplicates);
criterion_main!(benches);
