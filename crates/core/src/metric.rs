//! Distance metric definitions.

use crate::distance;
use serde::{Deserialize, Serialize};

/// Supported similarity metrics.
///
/// Every metric is reported as a distance: lower means more similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Squared Euclidean distance.
    #[default]
    L2,
    /// Cosine distance (`1 - cosine_similarity`).
    Cosine,
    /// Negated inner product.
    InnerProduct,
}

impl Metric {
    /// Distance between two vectors under this metric.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::L2 => distance::l2_distance_squared(a, b),
            Metric::Cosine => distance::cosine_distance(a, b),
            Metric::InnerProduct => -distance::dot_product(a, b),
        }
    }

    /// Distance when both L2 norms are already known.
    ///
    /// Norms are only consulted for cosine; the other metrics ignore them.
    #[inline]
    pub fn distance_with_norms(self, a: &[f32], norm_a: f32, b: &[f32], norm_b: f32) -> f32 {
        match self {
            Metric::Cosine => distance::cosine_distance_with_norms(a, b, norm_a, norm_b),
            other => other.distance(a, b),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Metric::L2 => write!(f, "l2"),
            Metric::Cosine => write!(f, "cosine"),
            Metric::InnerProduct => write!(f, "ip"),
        }
    }
}

impl std::str::FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Metric::L2),
            "cosine" => Ok(Metric::Cosine),
            "ip" | "inner_product" | "dot" => Ok(Metric::InnerProduct),
            _ => Err(format!("Unknown metric: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("L2".parse::<Metric>().unwrap(), Metric::L2);
        assert_eq!("euclidean".parse::<Metric>().unwrap(), Metric::L2);
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("ip".parse::<Metric>().unwrap(), Metric::InnerProduct);
        assert_eq!("dot".parse::<Metric>().unwrap(), Metric::InnerProduct);
        assert!("hamming".parse::<Metric>().is_err());
    }

    #[test]
    fn test_inner_product_lower_is_closer() {
        let q = [1.0, 0.0];
        let near = [2.0, 0.0];
        let far = [0.0, 2.0];
        let m = Metric::InnerProduct;
        assert!(m.distance(&q, &near) < m.distance(&q, &far));
    }
}
