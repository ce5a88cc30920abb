//! Index error types.

use spfresh_core::PartitionId;
use spfresh_storage::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid dimension: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },

    #[error("Invalid top-k: {0}")]
    InvalidTopK(i64),

    #[error("Unknown partition: {0}")]
    UnknownPartition(PartitionId),

    /// A split or merge would lose or duplicate members. Never persisted.
    #[error("Partition invariant violated: {0}")]
    InvariantViolation(String),
}

pub type IndexResult<T> = Result<T, IndexError>;
