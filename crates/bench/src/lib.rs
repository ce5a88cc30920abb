//! Benchmark utilities for the spfresh index.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use spfresh_engine::{Neighbor, VectorId};
use std::collections::HashSet;

/// Row-major standard-normal vectors from a fixed seed.
pub fn random_vectors(seed: u64, count: usize, dim: usize) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count * dim).map(|_| rng.sample::<f32, _>(StandardNormal)).collect()
}

/// Gaussian blobs around `clusters` random centers, closer to real
/// embedding data than isotropic noise.
pub fn clustered_vectors(seed: u64, count: usize, dim: usize, clusters: usize) -> Vec<f32> {
    let clusters = clusters.max(1);
    let centers = random_vectors(seed ^ 0x5eed, clusters, dim);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut out = Vec::with_capacity(count * dim);
    for i in 0..count {
        let center = &centers[(i % clusters) * dim..(i % clusters + 1) * dim];
        out.extend(center.iter().map(|c| c + 0.25 * rng.sample::<f32, _>(StandardNormal)));
    }
    out
}

/// Fraction of `truth` ids present in `found`.
pub fn recall(found: &[Neighbor], truth: &[Neighbor]) -> f64 {
    if truth.is_empty() {
        return 1.0;
    }
    let found: HashSet<VectorId> = found.iter().map(|n| n.id).collect();
    let hits = truth.iter().filter(|n| found.contains(&n.id)).count();
    hits as f64 / truth.len() as f64
}
