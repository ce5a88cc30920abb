//! Core vector operations, distance metrics, and index parameters for spfresh.

pub mod config;
pub mod distance;
pub mod metric;
pub mod types;

pub use config::{IndexParams, ParamError};
pub use distance::{
    cosine_distance, cosine_distance_with_norms, cosine_similarity, dot_product, l2_distance,
    l2_distance_squared, l2_norm,
};
pub use metric::Metric;
pub use types::{Location, PartitionId, VectorId};
