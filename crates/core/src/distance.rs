//! Distance kernels.
//!
//! The kernels accumulate into eight independent lanes so the compiler can
//! auto-vectorize the inner loop; the lanes are summed once at the end.

const LANES: usize = 8;

#[inline]
fn reduce(acc: [f32; LANES]) -> f32 {
    (acc[0] + acc[4]) + (acc[1] + acc[5]) + (acc[2] + acc[6]) + (acc[3] + acc[7])
}

/// Squared Euclidean distance. Cheaper than [`l2_distance`] and order-preserving.
#[inline]
pub fn l2_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut acc = [0.0f32; LANES];
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let tail: f32 = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| (x - y) * (x - y))
        .sum();

    for (xa, xb) in a_chunks.zip(b_chunks) {
        for lane in 0..LANES {
            let d = xa[lane] - xb[lane];
            acc[lane] += d * d;
        }
    }

    reduce(acc) + tail
}

#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    l2_distance_squared(a, b).sqrt()
}

#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut acc = [0.0f32; LANES];
    let a_chunks = a.chunks_exact(LANES);
    let b_chunks = b.chunks_exact(LANES);
    let tail: f32 = a_chunks
        .remainder()
        .iter()
        .zip(b_chunks.remainder())
        .map(|(x, y)| x * y)
        .sum();

    for (xa, xb) in a_chunks.zip(b_chunks) {
        for lane in 0..LANES {
            acc[lane] += xa[lane] * xb[lane];
        }
    }

    reduce(acc) + tail
}

#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot_product(v, v).sqrt()
}

/// Cosine similarity in `[-1, 1]`. A zero vector has similarity 0 with anything.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let denom = l2_norm(a) * l2_norm(b);
    if denom == 0.0 {
        return 0.0;
    }
    dot_product(a, b) / denom
}

/// Cosine distance in `[0, 2]`, defined as `1 - cosine_similarity`.
#[inline]
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    1.0 - cosine_similarity(a, b)
}

/// Cosine distance with both norms precomputed.
///
/// Agrees with [`cosine_distance`] including the zero-vector case.
#[inline]
pub fn cosine_distance_with_norms(a: &[f32], b: &[f32], norm_a: f32, norm_b: f32) -> f32 {
    let denom = norm_a * norm_b;
    if denom == 0.0 {
        return 1.0;
    }
    1.0 - dot_product(a, b) / denom
}

/// Mean of a set of equal-length vectors, accumulated in f64.
///
/// Returns `None` for an empty set.
pub fn mean<'a, I>(vectors: I, dim: usize) -> Option<Vec<f32>>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum = vec![0.0f64; dim];
    let mut count = 0usize;
    for v in vectors {
        for (s, &x) in sum.iter_mut().zip(v) {
            *s += x as f64;
        }
        count += 1;
    }
    if count == 0 {
        return None;
    }
    let n = count as f64;
    Some(sum.into_iter().map(|s| (s / n) as f32).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn assert_approx_eq(a: f32, b: f32) {
        assert!((a - b).abs() < EPSILON, "{} != {}", a, b);
    }

    #[test]
    fn test_l2_distance_squared() {
        assert_approx_eq(l2_distance_squared(&[1.0, 0.0, 0.0], &[0.0, 1.0, 0.0]), 2.0);
        // 3^2 * 3
        assert_approx_eq(l2_distance_squared(&[1.0, 2.0, 3.0], &[4.0, 5.0, 6.0]), 27.0);
        assert_approx_eq(l2_distance(&[0.0, 0.0], &[3.0, 4.0]), 5.0);
    }

    #[test]
    fn test_kernels_match_naive_across_chunk_boundary() {
        for dim in [1usize, 7, 8, 9, 17, 33] {
            let a: Vec<f32> = (0..dim).map(|i| i as f32 * 0.5).collect();
            let b: Vec<f32> = (0..dim).map(|i| 1.0 - i as f32 * 0.25).collect();
            let naive_l2: f32 = a.iter().zip(&b).map(|(x, y)| (x - y) * (x - y)).sum();
            let naive_dot: f32 = a.iter().zip(&b).map(|(x, y)| x * y).sum();
            assert!((l2_distance_squared(&a, &b) - naive_l2).abs() < 1e-3);
            assert!((dot_product(&a, &b) - naive_dot).abs() < 1e-3);
        }
    }

    #[test]
    fn test_cosine() {
        assert_approx_eq(cosine_similarity(&[1.0, 0.0], &[2.0, 0.0]), 1.0);
        assert_approx_eq(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), -1.0);
        assert_approx_eq(cosine_distance(&[1.0, 0.0], &[0.0, 1.0]), 1.0);
        assert_approx_eq(cosine_distance(&[1.0, 0.0], &[-3.0, 0.0]), 2.0);
    }

    #[test]
    fn test_zero_vector_cosine_is_neutral() {
        let zero = [0.0, 0.0, 0.0];
        let v = [1.0, 2.0, 3.0];
        assert_approx_eq(cosine_similarity(&zero, &v), 0.0);
        assert_approx_eq(cosine_distance(&zero, &v), 1.0);
        assert_approx_eq(cosine_distance_with_norms(&zero, &v, 0.0, l2_norm(&v)), 1.0);
    }

    #[test]
    fn test_mean() {
        let rows: Vec<Vec<f32>> = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
        let m = mean(rows.iter().map(|v| v.as_slice()), 2).unwrap();
        assert_approx_eq(m[0], 2.0 / 3.0);
        assert_approx_eq(m[1], 2.0 / 3.0);
        assert!(mean(std::iter::empty(), 2).is_none());
    }
}
