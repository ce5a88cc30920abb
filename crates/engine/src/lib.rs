//! spfresh index façade.
//!
//! Composes the vector store, partition table, rebalancer, search, and
//! snapshot persistence into one thread-safe [`Index`].

pub mod error;
pub mod index;

pub use error::{EngineError, EngineResult, ErrorKind};
pub use index::{Index, IndexStats};
pub use spfresh_core::{IndexParams, Metric, PartitionId, VectorId};
pub use spfresh_index::{Neighbor, RebalanceReport};
