//! Recall benchmark for the spfresh index.
//!
//! Builds an index from synthetic data, then compares probed search against
//! brute force to measure recall@K and latency at several probe counts.

use clap::Parser;
use spfresh_bench::{clustered_vectors, random_vectors, recall};
use spfresh_engine::Index;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "recall-bench")]
#[command(about = "Benchmark recall@K of probed search vs brute-force ground truth")]
struct Args {
    /// Index directory. A temporary directory is used when omitted.
    #[arg(long)]
    index_dir: Option<PathBuf>,

    #[arg(long, default_value = "64")]
    dim: usize,

    #[arg(long, default_value = "50000")]
    num_vectors: usize,

    /// Insert batch size.
    #[arg(long, default_value = "1000")]
    batch: usize,

    /// Number of Gaussian clusters in the data (0 = isotropic noise).
    #[arg(long, default_value = "64")]
    clusters: usize,

    #[arg(long, default_value = "200")]
    num_queries: usize,

    #[arg(long, default_value = "10")]
    top_k: usize,

    /// Comma-separated probe counts to test.
    #[arg(long, default_value = "1,4,8,16,32")]
    probes: String,

    /// Index parameters, e.g. "metric=cosine,high_watermark=512".
    #[arg(long, default_value = "")]
    params: String,

    /// Save the index after building and report the time taken.
    #[arg(long)]
    save: bool,

    #[arg(long, default_value = "recall_results.csv")]
    output: PathBuf,

    #[arg(long, default_value = "42")]
    seed: u64,
}

#[derive(Debug)]
struct BenchmarkResult {
    probe_count: usize,
    top_k: usize,
    num_queries: usize,
    mean_recall: f64,
    p50_latency_ms: f64,
    p95_latency_ms: f64,
    p99_latency_ms: f64,
    mean_latency_ms: f64,
    qps: f64,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let probes: Vec<usize> = args
        .probes
        .split(',')
        .filter_map(|s| s.trim().parse().ok())
        .filter(|&p| p > 0)
        .collect();
    if probes.is_empty() {
        anyhow::bail!("No valid probe counts provided");
    }
    if args.dim == 0 || args.batch == 0 || args.top_k == 0 {
        anyhow::bail!("dim, batch and top_k must be positive");
    }

    let scratch = tempfile::tempdir()?;
    let dir = args.index_dir.clone().unwrap_or_else(|| scratch.path().to_path_buf());

    tracing::info!(
        dir = %dir.display(),
        dim = args.dim,
        vectors = args.num_vectors,
        clusters = args.clusters,
        "Starting recall benchmark"
    );

    let index = Index::open(&dir, args.dim, &args.params)?;
    let data = if args.clusters == 0 {
        random_vectors(args.seed, args.num_vectors, args.dim)
    } else {
        clustered_vectors(args.seed, args.num_vectors, args.dim, args.clusters)
    };

    let build_start = Instant::now();
    for chunk in data.chunks(args.batch * args.dim) {
        index.add(chunk, None)?;
    }
    let report = index.maintain()?;
    let build_elapsed = build_start.elapsed();

    let stats = index.stats();
    tracing::info!(
        elapsed_ms = build_elapsed.as_millis() as u64,
        partitions = stats.partitions,
        min = stats.min_partition_size,
        max = stats.max_partition_size,
        mean = stats.mean_partition_size,
        merges = report.merges,
        "Index built"
    );

    if args.save {
        let start = Instant::now();
        let snap = index.save()?;
        tracing::info!(
            snapshot = %snap.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Index saved"
        );
    }

    let queries = random_vectors(args.seed.wrapping_add(1), args.num_queries, args.dim);
    let queries: Vec<&[f32]> = queries.chunks(args.dim).collect();

    tracing::info!("Computing ground truth (brute-force search)...");
    let truth = queries
        .iter()
        .map(|q| index.brute_force_search(q, args.top_k))
        .collect::<Result<Vec<_>, _>>()?;

    let mut results = Vec::new();
    for &probe_count in &probes {
        let result = run_probe(&index, &queries, &truth, args.top_k, probe_count)?;
        tracing::info!(
            "  probe={}: recall={:.4}, p50={:.2}ms, p95={:.2}ms, qps={:.0}",
            result.probe_count,
            result.mean_recall,
            result.p50_latency_ms,
            result.p95_latency_ms,
            result.qps
        );
        results.push(result);
    }

    write_csv(&args.output, &results)?;
    tracing::info!("Results written to {:?}", args.output);

    println!("\n{}", "=".repeat(80));
    println!("RECALL BENCHMARK RESULTS");
    println!("{}", "=".repeat(80));
    println!(
        "{:>8} {:>8} {:>12} {:>12} {:>12} {:>12} {:>12} {:>10}",
        "probe", "top_k", "queries", "recall", "p50_ms", "p95_ms", "p99_ms", "qps"
    );
    println!("{}", "-".repeat(80));
    for r in &results {
        println!(
            "{:>8} {:>8} {:>12} {:>12.4} {:>12.2} {:>12.2} {:>12.2} {:>10.0}",
            r.probe_count,
            r.top_k,
            r.num_queries,
            r.mean_recall,
            r.p50_latency_ms,
            r.p95_latency_ms,
            r.p99_latency_ms,
            r.qps
        );
    }
    println!("{}", "=".repeat(80));

    index.close();
    Ok(())
}

fn run_probe(
    index: &Index,
    queries: &[&[f32]],
    truth: &[Vec<spfresh_engine::Neighbor>],
    top_k: usize,
    probe_count: usize,
) -> anyhow::Result<BenchmarkResult> {
    let mut latencies: Vec<Duration> = Vec::with_capacity(queries.len());
    let mut recall_sum = 0.0;

    let total_start = Instant::now();
    for (query, expected) in queries.iter().zip(truth) {
        let start = Instant::now();
        let hits = index.search_with_probe(query, top_k, probe_count)?;
        latencies.push(start.elapsed());
        recall_sum += recall(&hits, expected);
    }
    let total_elapsed = total_start.elapsed();

    let n = queries.len().max(1);
    latencies.sort();
    let percentile = |p: f64| {
        latencies
            .get(((n as f64 * p) as usize).min(n - 1))
            .map_or(0.0, |d| d.as_secs_f64() * 1000.0)
    };
    let total: Duration = latencies.iter().sum();

    Ok(BenchmarkResult {
        probe_count,
        top_k,
        num_queries: queries.len(),
        mean_recall: recall_sum / n as f64,
        p50_latency_ms: percentile(0.50),
        p95_latency_ms: percentile(0.95),
        p99_latency_ms: percentile(0.99),
        mean_latency_ms: total.as_secs_f64() * 1000.0 / n as f64,
        qps: queries.len() as f64 / total_elapsed.as_secs_f64().max(f64::EPSILON),
    })
}

fn write_csv(path: &PathBuf, results: &[BenchmarkResult]) -> anyhow::Result<()> {
    let mut file = File::create(path)?;
    writeln!(
        file,
        "probe_count,top_k,num_queries,mean_recall,p50_ms,p95_ms,p99_ms,mean_ms,qps"
    )?;
    for r in results {
        writeln!(
            file,
            "{},{},{},{:.6},{:.4},{:.4},{:.4},{:.4},{:.2}",
            r.probe_count,
            r.top_k,
            r.num_queries,
            r.mean_recall,
            r.p50_latency_ms,
            r.p95_latency_ms,
            r.p99_latency_ms,
            r.mean_latency_ms,
            r.qps
        )?;
    }
    Ok(())
}
