//! Benchmarks for the clustering and classification stages

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use fieldprod_algorithms::classification::{
    affinity_propagation, classify, AffinityClusterer, AffinityParams, ClassifyParams,
    ClusterEngine, StandardScaler,
};
use fieldprod_algorithms::temporal::{preprocess, PreprocessParams};
use fieldprod_core::{Raster, RasterStack, RasterYear, YearMeta};
use ndarray::Array2;

/// Deterministic five-year matrix with two loose productivity zones.
fn create_matrix(rows: usize) -> Array2<f64> {
    Array2::from_shape_fn((rows, 5), |(r, y)| {
        let zone = if r % 3 == 0 { 0.7 } else { 0.35 };
        zone + ((r * 7 + y * 13) % 17) as f64 * 0.004
    })
}

fn create_stack(size: usize) -> RasterStack {
    let years = (0..5)
        .map(|y| {
            let mut r = Raster::new(size, size);
            for row in 0..size {
                for col in 0..size {
                    let v = if row == 0 && col == 0 {
                        -1.0
                    } else {
                        0.3 + ((row * 7 + col * 13 + y * 3) % 40) as f64 * 0.01
                    };
                    r.set(row, col, v).unwrap();
                }
            }
            RasterYear::new(YearMeta::local(2024 - y as i32), r)
        })
        .collect();
    RasterStack::new(years).unwrap()
}

fn bench_affinity(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification/affinity");
    group.sample_size(10);
    for rows in [100, 250, 500] {
        let x = StandardScaler::fit_transform(&create_matrix(rows));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| affinity_propagation(black_box(&x), &AffinityParams::default()).unwrap())
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification/stack");
    group.sample_size(10);
    for size in [8, 16, 24] {
        let stack = create_stack(size);
        let engine = AffinityClusterer::default();
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let pre = preprocess(black_box(&stack), &PreprocessParams::default()).unwrap();
                let outcome = engine.cluster(&pre.pixel_matrix).unwrap();
                classify(&pre, &outcome, &ClassifyParams::default()).unwrap()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_affinity, bench_pipeline);
criterion_main!(benches);
