//! Snapshot manifest.
//!
//! The manifest is JSON wrapped in an envelope carrying a crc32 of the
//! serialized body, so a torn or hand-edited manifest is detected on load.

use crate::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use spfresh_core::{IndexParams, Metric, PartitionId};

/// Current on-disk layout version.
pub const FORMAT_VERSION: u32 = 1;

pub const MANIFEST_FILE: &str = "MANIFEST";
pub const ID_INDEX_FILE: &str = "ids.bin";

/// A data file referenced by the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub bytes: u64,
    pub crc32: u32,
}

impl FileEntry {
    pub fn for_bytes(name: impl Into<String>, data: &[u8]) -> Self {
        Self {
            name: name.into(),
            bytes: data.len() as u64,
            crc32: crc32fast::hash(data),
        }
    }

    /// Check `data` against the recorded length and checksum.
    pub fn verify(&self, data: &[u8]) -> StorageResult<()> {
        if data.len() as u64 != self.bytes {
            return Err(StorageError::Corrupt(format!(
                "{}: expected {} bytes, found {}",
                self.name,
                self.bytes,
                data.len()
            )));
        }
        let got = crc32fast::hash(data);
        if got != self.crc32 {
            return Err(StorageError::ChecksumMismatch {
                file: self.name.clone(),
                expected: self.crc32,
                got,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub dim: usize,
    pub metric: Metric,
    pub partition_count: usize,
    pub live_count: usize,
    pub next_auto_id: i64,
    pub next_partition_id: u32,
    pub retired_partitions: Vec<PartitionId>,
    pub params: IndexParams,
    /// Partition files followed by the id index.
    pub files: Vec<FileEntry>,
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    checksum: u32,
    manifest: Manifest,
}

impl Manifest {
    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let envelope = Envelope {
            checksum: crc32fast::hash(&body),
            manifest: self.clone(),
        };
        Ok(serde_json::to_vec_pretty(&envelope)?)
    }

    pub fn from_bytes(data: &[u8]) -> StorageResult<Self> {
        let envelope: Envelope = serde_json::from_slice(data)?;
        let body = serde_json::to_vec(&envelope.manifest)?;
        let got = crc32fast::hash(&body);
        if got != envelope.checksum {
            return Err(StorageError::ChecksumMismatch {
                file: MANIFEST_FILE.to_string(),
                expected: envelope.checksum,
                got,
            });
        }
        let manifest = envelope.manifest;
        if manifest.format_version != FORMAT_VERSION {
            return Err(StorageError::UnsupportedVersion(manifest.format_version));
        }
        if manifest.files.len() != manifest.partition_count + 1 {
            return Err(StorageError::Corrupt(format!(
                "manifest lists {} files for {} partitions",
                manifest.files.len(),
                manifest.partition_count
            )));
        }
        Ok(manifest)
    }

    pub fn file(&self, name: &str) -> StorageResult<&FileEntry> {
        self.files
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| StorageError::Corrupt(format!("manifest does not list {}", name)))
    }
}
