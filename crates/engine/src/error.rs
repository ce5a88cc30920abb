//! Engine error types and their stable classification.

use spfresh_core::{Metric, ParamError};
use spfresh_index::IndexError;
use spfresh_storage::StorageError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamError),

    #[error("Dimension must be positive, got {0}")]
    InvalidDimension(i64),

    #[error("Index not found at {0}")]
    IndexNotFound(PathBuf),

    #[error("Index was created with metric {stored}, open requested {requested}")]
    MetricConflict { stored: Metric, requested: Metric },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure kinds with stable numeric codes. 0 is reserved for success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorKind {
    InvalidDimension = 1,
    DuplicateId = 2,
    InvalidTopK = 3,
    IndexNotFound = 4,
    CorruptPersistence = 5,
    DimensionMismatch = 6,
    OutOfMemory = 7,
    IoFailure = 8,
    InvalidParameter = 9,
    InvariantViolation = 10,
    InvalidHandle = 11,
    Internal = 12,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidDimension => "invalid dimension",
            ErrorKind::DuplicateId => "duplicate id",
            ErrorKind::InvalidTopK => "invalid top-k",
            ErrorKind::IndexNotFound => "index not found",
            ErrorKind::CorruptPersistence => "corrupt persistence",
            ErrorKind::DimensionMismatch => "dimension mismatch",
            ErrorKind::OutOfMemory => "out of memory",
            ErrorKind::IoFailure => "I/O failure",
            ErrorKind::InvalidParameter => "invalid parameter",
            ErrorKind::InvariantViolation => "invariant violation",
            ErrorKind::InvalidHandle => "invalid handle",
            ErrorKind::Internal => "internal error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Storage(e) => storage_kind(e),
            EngineError::Index(e) => index_kind(e),
            EngineError::Params(_) | EngineError::MetricConflict { .. } => {
                ErrorKind::InvalidParameter
            }
            EngineError::InvalidDimension(_) => ErrorKind::InvalidDimension,
            EngineError::IndexNotFound(_) => ErrorKind::IndexNotFound,
            EngineError::Internal(_) => ErrorKind::Internal,
        }
    }
}

fn index_kind(e: &IndexError) -> ErrorKind {
    match e {
        IndexError::Storage(e) => storage_kind(e),
        IndexError::InvalidDimension { .. } => ErrorKind::InvalidDimension,
        IndexError::InvalidTopK(_) => ErrorKind::InvalidTopK,
        IndexError::UnknownPartition(_) | IndexError::InvariantViolation(_) => {
            ErrorKind::InvariantViolation
        }
    }
}

fn storage_kind(e: &StorageError) -> ErrorKind {
    if e.is_corruption() {
        return ErrorKind::CorruptPersistence;
    }
    match e {
        StorageError::Io(io) if io.kind() == std::io::ErrorKind::OutOfMemory => {
            ErrorKind::OutOfMemory
        }
        StorageError::Io(_) => ErrorKind::IoFailure,
        StorageError::InvalidDimension { .. } => ErrorKind::InvalidDimension,
        StorageError::DimensionMismatch { .. } => ErrorKind::DimensionMismatch,
        StorageError::DuplicateId(_) => ErrorKind::DuplicateId,
        StorageError::InvalidId(_)
        | StorageError::UnknownId(_)
        | StorageError::BatchLength { .. }
        | StorageError::NonFinite { .. } => ErrorKind::InvalidParameter,
        StorageError::OutOfMemory(_) => ErrorKind::OutOfMemory,
        _ => ErrorKind::CorruptPersistence,
    }
}
