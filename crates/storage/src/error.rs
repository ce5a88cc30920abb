//! Storage error types.

use spfresh_core::VectorId;
use thiserror::Error;

/// Storage-related errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid dimension: expected {expected}, got {got}")]
    InvalidDimension { expected: usize, got: usize },

    #[error("Dimension mismatch: index stores {stored}, caller requested {requested}")]
    DimensionMismatch { stored: usize, requested: usize },

    #[error("Duplicate id: {0}")]
    DuplicateId(VectorId),

    #[error("Invalid id {0}: ids must be in 0..i64::MAX")]
    InvalidId(i64),

    #[error("Id not found: {0}")]
    UnknownId(VectorId),

    #[error("Batch has {vectors} vectors but {ids} ids")]
    BatchLength { vectors: usize, ids: usize },

    #[error("Vector {row} contains a non-finite component")]
    NonFinite { row: usize },

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Invalid magic bytes in {0}")]
    InvalidMagic(String),

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u32),

    #[error("Checksum mismatch in {file}: expected {expected:#010x}, got {got:#010x}")]
    ChecksumMismatch { file: String, expected: u32, got: u32 },

    #[error("Corrupt snapshot: {0}")]
    Corrupt(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether retrying the same I/O could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StorageError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }

    /// Whether the error means the on-disk state cannot be trusted.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::InvalidMagic(_)
                | StorageError::UnsupportedVersion(_)
                | StorageError::ChecksumMismatch { .. }
                | StorageError::Corrupt(_)
                | StorageError::Json(_)
        )
    }
}

impl From<std::collections::TryReserveError> for StorageError {
    fn from(e: std::collections::TryReserveError) -> Self {
        StorageError::OutOfMemory(e.to_string())
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
