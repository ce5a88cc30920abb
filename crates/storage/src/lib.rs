//! Storage layer for spfresh.
//!
//! Provides the in-memory vector store, the binary partition and id-index
//! file formats, and atomic snapshot persistence.

pub mod error;
pub mod format;
pub mod manifest;
pub mod snapshot;
pub mod vector_store;

pub use error::{StorageError, StorageResult};
pub use format::{IdIndexEntry, PartitionRecord};
pub use manifest::{FileEntry, Manifest, FORMAT_VERSION};
pub use snapshot::{Snapshot, SnapshotStore};
pub use vector_store::VectorStore;
