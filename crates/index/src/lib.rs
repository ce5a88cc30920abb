//! Partitioned vector index for spfresh.
//!
//! Implements:
//! - The partition table (centroids + posting lists, nearest-centroid routing)
//! - Deterministic k-means used to split partitions
//! - The rebalancer that keeps posting lists between the watermarks
//! - Probe-limited top-k search
//! - Conversion between live structures and on-disk snapshots

pub mod error;
pub mod kmeans;
pub mod partition;
pub mod persist;
pub mod rebalance;
pub mod search;

pub use error::{IndexError, IndexResult};
pub use kmeans::{kmeans, KMeansConfig, KMeansResult};
pub use partition::{Partition, PartitionTable};
pub use persist::{capture, restore};
pub use rebalance::{verify, MergeOutcome, RebalanceConfig, RebalanceReport, Rebalancer};
pub use search::{brute_force_search, search, Neighbor};
