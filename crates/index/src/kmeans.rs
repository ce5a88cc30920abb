//! K-means clustering with deterministic farthest-first initialization.
//!
//! Used to split oversized partitions, so identical inputs must always yield
//! identical clusters: no randomness, ties broken by input order.

use rayon::prelude::*;
use spfresh_core::{distance, Metric};

/// Inputs below this size are assigned sequentially.
const PARALLEL_THRESHOLD: usize = 1024;

/// Configuration for k-means clustering.
#[derive(Debug, Clone)]
pub struct KMeansConfig {
    /// Number of clusters (k).
    pub num_clusters: usize,
    /// Maximum Lloyd iterations.
    pub max_iterations: usize,
    /// Convergence threshold (fraction of vectors that changed assignment).
    pub convergence_threshold: f64,
    pub metric: Metric,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            num_clusters: 2,
            max_iterations: 10,
            convergence_threshold: 0.0,
            metric: Metric::L2,
        }
    }
}

/// Result of k-means clustering.
#[derive(Debug)]
pub struct KMeansResult {
    /// Centroids for each cluster.
    pub centroids: Vec<Vec<f32>>,
    /// Cluster assignment for each vector.
    pub assignments: Vec<usize>,
    /// Number of iterations performed.
    pub iterations: usize,
    /// Whether the algorithm converged.
    pub converged: bool,
}

impl KMeansResult {
    /// Input indices grouped by cluster, each group in input order.
    pub fn clusters(&self) -> Vec<Vec<usize>> {
        let mut groups = vec![Vec::new(); self.centroids.len()];
        for (i, &c) in self.assignments.iter().enumerate() {
            groups[c].push(i);
        }
        groups
    }
}

/// Run k-means on `vectors` under `config.metric`.
///
/// Seeds are chosen farthest-first: the point farthest from the mean, then
/// repeatedly the point farthest from every seed chosen so far.
pub fn kmeans(vectors: &[&[f32]], config: &KMeansConfig) -> KMeansResult {
    if vectors.is_empty() || config.num_clusters == 0 {
        return KMeansResult {
            centroids: Vec::new(),
            assignments: vec![0; vectors.len()],
            iterations: 0,
            converged: true,
        };
    }

    let dim = vectors[0].len();
    let k = config.num_clusters.min(vectors.len());
    let metric = config.metric;

    let mut centroids = farthest_first_init(vectors, k, dim, metric);
    let mut assignments = assign_all(vectors, &centroids, metric);

    let mut iterations = 0;
    let mut converged = false;

    for iter in 0..config.max_iterations {
        iterations = iter + 1;
        centroids = update_centroids(vectors, &assignments, &centroids, dim);

        let new_assignments = assign_all(vectors, &centroids, metric);
        let changes = assignments
            .iter()
            .zip(new_assignments.iter())
            .filter(|(a, b)| a != b)
            .count();
        assignments = new_assignments;

        let change_ratio = changes as f64 / vectors.len() as f64;
        tracing::trace!(
            "K-means iteration {}: {} changes ({:.2}%)",
            iter + 1,
            changes,
            change_ratio * 100.0
        );

        if change_ratio <= config.convergence_threshold {
            converged = true;
            break;
        }
    }

    KMeansResult {
        centroids,
        assignments,
        iterations,
        converged,
    }
}

fn farthest_first_init(vectors: &[&[f32]], k: usize, dim: usize, metric: Metric) -> Vec<Vec<f32>> {
    let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(k);
    let mean = distance::mean(vectors.iter().copied(), dim).unwrap_or_else(|| vec![0.0; dim]);

    let first = argmax(vectors.iter().map(|v| metric.distance(v, &mean)));
    let mut chosen = vec![false; vectors.len()];
    chosen[first] = true;
    centroids.push(vectors[first].to_vec());

    let mut min_distances: Vec<f32> = vectors
        .iter()
        .map(|v| metric.distance(v, &centroids[0]))
        .collect();

    for _ in 1..k {
        let next = argmax(
            min_distances
                .iter()
                .zip(&chosen)
                .map(|(&d, &taken)| if taken { f32::NEG_INFINITY } else { d }),
        );
        chosen[next] = true;
        let seed = vectors[next].to_vec();
        for (d, v) in min_distances.iter_mut().zip(vectors) {
            let dist = metric.distance(v, &seed);
            if dist < *d {
                *d = dist;
            }
        }
        centroids.push(seed);
    }

    centroids
}

/// Index of the largest value; the first one wins ties.
fn argmax(values: impl Iterator<Item = f32>) -> usize {
    let mut best_idx = 0;
    let mut best = f32::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best {
            best = v;
            best_idx = i;
        }
    }
    best_idx
}

fn nearest_centroid(v: &[f32], centroids: &[Vec<f32>], metric: Metric) -> usize {
    let mut best_idx = 0;
    let mut best_dist = f32::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let dist = metric.distance(v, c);
        if dist < best_dist {
            best_dist = dist;
            best_idx = i;
        }
    }
    best_idx
}

fn assign_all(vectors: &[&[f32]], centroids: &[Vec<f32>], metric: Metric) -> Vec<usize> {
    if vectors.len() >= PARALLEL_THRESHOLD {
        vectors
            .par_iter()
            .map(|v| nearest_centroid(v, centroids, metric))
            .collect()
    } else {
        vectors
            .iter()
            .map(|v| nearest_centroid(v, centroids, metric))
            .collect()
    }
}

/// Recompute means. An empty cluster keeps its previous centroid.
fn update_centroids(
    vectors: &[&[f32]],
    assignments: &[usize],
    previous: &[Vec<f32>],
    dim: usize,
) -> Vec<Vec<f32>> {
    let mut sums = vec![vec![0.0f64; dim]; previous.len()];
    let mut counts = vec![0usize; previous.len()];
    for (v, &c) in vectors.iter().zip(assignments) {
        for (s, &x) in sums[c].iter_mut().zip(v.iter()) {
            *s += x as f64;
        }
        counts[c] += 1;
    }

    sums.into_iter()
        .zip(counts)
        .zip(previous)
        .map(|((sum, count), old)| {
            if count == 0 {
                old.clone()
            } else {
                sum.iter().map(|&s| (s / count as f64) as f32).collect()
            }
        })
        .collect()
}
