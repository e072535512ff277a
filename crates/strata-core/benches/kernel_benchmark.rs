//! Benchmark suite for the vector kernels behind list scanning.
//!
//! Run with: `cargo bench -p strata-core`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strata_core::simd;

fn generate_vector(dim: usize, phase: f32) -> Vec<f32> {
    (0..dim).map(|i| (i as f32 * 0.1 + phase).sin()).collect()
}

fn bench_distance_kernels(c: &mut Criterion) {
    let dim = 128;
    let a = generate_vector(dim, 0.0);
    let b = generate_vector(dim, 1.0);

    c.bench_function("squared_l2_128d", |bench| {
        bench.iter(|| black_box(simd::squared_l2(&a, &b)));
    });

    c.bench_function("inner_product_128d", |bench| {
        bench.iter(|| black_box(simd::inner_product(&a, &b)));
    });
}

fn bench_batch_norms(c: &mut Criterion) {
    let dim = 128;
    let rows: Vec<f32> = (0..256 * dim).map(|i| (i as f32 * 0.37).cos()).collect();

    c.bench_function("batch_squared_norms_256x128", |bench| {
        bench.iter(|| black_box(simd::batch_squared_norms(&rows, dim)));
    });
}

fn bench_affine_kernels(c: &mut Criterion) {
    let dim = 128;
    let a = generate_vector(dim, 0.5);
    let b = generate_vector(dim, 2.0);
    let mut out = vec![0.0f32; dim];

    c.bench_function("scaled_add_128d", |bench| {
        bench.iter(|| {
            simd::scaled_add_into(&mut out, &a, &b, 0.37);
            black_box(out[0])
        });
    });
}

criterion_group!(
    benches,
    bench_distance_kernels,
    bench_batch_norms,
    bench_affine_kernels
);
criterion_main!(benches);
