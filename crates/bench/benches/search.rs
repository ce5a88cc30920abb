//! Insert, search and rebalance benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spfresh_bench::{clustered_vectors, random_vectors};
use spfresh_core::Metric;
use spfresh_engine::Index;
use spfresh_index::{kmeans, KMeansConfig};
use tempfile::tempdir;

const DIM: usize = 128;

fn build_index(count: usize, params: &str) -> (tempfile::TempDir, Index) {
    let dir = tempdir().unwrap();
    let index = Index::open(dir.path(), DIM, params).unwrap();
    let data = clustered_vectors(7, count, DIM, 32);
    for chunk in data.chunks(1000 * DIM) {
        index.add(chunk, None).unwrap();
    }
    (dir, index)
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    group.sample_size(10);

    for count in [5_000, 20_000] {
        let data = clustered_vectors(1, count, DIM, 32);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &data, |bench, data| {
            bench.iter(|| {
                let dir = tempdir().unwrap();
                let index = Index::open(dir.path(), DIM, "high_watermark=256").unwrap();
                for chunk in data.chunks(1000 * DIM) {
                    index.add(black_box(chunk), None).unwrap();
                }
                index
            })
        });
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("search");
    let (_dir, index) = build_index(50_000, "high_watermark=512");
    let queries = random_vectors(11, 64, DIM);
    let queries: Vec<&[f32]> = queries.chunks(DIM).collect();

    for probe in [1, 8, 32] {
        group.bench_with_input(BenchmarkId::new("probe", probe), &probe, |bench, &probe| {
            let mut i = 0;
            bench.iter(|| {
                let q = queries[i % queries.len()];
                i += 1;
                index.search_with_probe(black_box(q), 10, probe).unwrap()
            })
        });
    }
    group.bench_function("brute_force", |bench| {
        bench.iter(|| index.brute_force_search(black_box(queries[0]), 10).unwrap())
    });

    group.finish();
}

fn bench_split_kmeans(c: &mut Criterion) {
    let mut group = c.benchmark_group("split_kmeans");
    let data = clustered_vectors(3, 1024, DIM, 2);
    let rows: Vec<&[f32]> = data.chunks(DIM).collect();

    for metric in [Metric::L2, Metric::Cosine] {
        let config = KMeansConfig {
            metric,
            ..KMeansConfig::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(metric), &config, |bench, config| {
            bench.iter(|| kmeans(black_box(&rows), config))
        });
    }

    group.finish();
}

fn bench_maintain(c: &mut Criterion) {
    let mut group = c.benchmark_group("maintain");
    group.sample_size(10);

    group.bench_function("remove_half_then_merge", |bench| {
        bench.iter_with_setup(
            || {
                let (dir, index) = build_index(10_000, "low_watermark=64,high_watermark=256");
                let ids: Vec<_> = (0..5_000).map(spfresh_core::VectorId).collect();
                index.remove(&ids).unwrap();
                (dir, index)
            },
            |(_dir, index)| index.maintain().unwrap(),
        )
    });

    group.finish();
}

criterion_group!(benches, bench_insert, bench_search, bench_split_kmeans, bench_maintain);
criterion_main!(benches);
