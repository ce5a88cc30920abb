//! Binary file formats of a snapshot.
//!
//! Partition file layout (little-endian):
//! ```text
//! HEADER (24 bytes):
//!   magic: "SPFPART\0" (8 bytes)
//!   version: u32
//!   dimension: u32
//!   partition_id: u32
//!   num_members: u32
//!
//! CENTROID:
//!   [dim] f32
//!
//! MEMBERS:
//!   For each member:
//!     id: i64
//!     vector: [dim] f32
//! ```
//!
//! Id index layout:
//! ```text
//! HEADER (16 bytes):
//!   magic: "SPFIDS1\0" (8 bytes)
//!   version: u32
//!   num_entries: u32
//!
//! ENTRIES (sorted by id, 16 bytes each):
//!   id: i64
//!   partition: u32   (u32::MAX marks a deleted id)
//!   offset: u32      (position inside the partition file's member list)
//! ```

use crate::error::{StorageError, StorageResult};
use spfresh_core::{PartitionId, VectorId};

pub const PARTITION_MAGIC: &[u8; 8] = b"SPFPART\0";
pub const ID_INDEX_MAGIC: &[u8; 8] = b"SPFIDS1\0";
pub const BINARY_VERSION: u32 = 1;

pub const PARTITION_HEADER_SIZE: usize = 8 + 4 * 4;
pub const ID_INDEX_HEADER_SIZE: usize = 8 + 4 + 4;
pub const ID_INDEX_ENTRY_SIZE: usize = 16;

/// Partition tag for ids that are deleted but stay reserved.
pub const TOMBSTONE_PARTITION: u32 = u32::MAX;

/// One partition as written to disk.
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRecord {
    pub id: PartitionId,
    pub centroid: Vec<f32>,
    pub ids: Vec<VectorId>,
    /// Row-major member vectors, `ids.len() * dim` components.
    pub vectors: Vec<f32>,
}

impl PartitionRecord {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn file_name(&self) -> String {
        partition_file_name(self.id)
    }

    pub fn byte_size(&self) -> usize {
        let dim = self.centroid.len();
        PARTITION_HEADER_SIZE + dim * 4 + self.ids.len() * (8 + dim * 4)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let dim = self.centroid.len();
        let mut buf = Vec::with_capacity(self.byte_size());
        buf.extend_from_slice(PARTITION_MAGIC);
        buf.extend_from_slice(&BINARY_VERSION.to_le_bytes());
        buf.extend_from_slice(&(dim as u32).to_le_bytes());
        buf.extend_from_slice(&self.id.0.to_le_bytes());
        buf.extend_from_slice(&(self.ids.len() as u32).to_le_bytes());
        for &c in &self.centroid {
            buf.extend_from_slice(&c.to_le_bytes());
        }
        for (id, row) in self.ids.iter().zip(self.vectors.chunks_exact(dim.max(1))) {
            buf.extend_from_slice(&id.0.to_le_bytes());
            for &v in row {
                buf.extend_from_slice(&v.to_le_bytes());
            }
        }
        buf
    }

    /// Parse a partition file, requiring the stored dimension to equal `dim`.
    pub fn from_bytes(data: &[u8], dim: usize, file: &str) -> StorageResult<Self> {
        let mut r = Reader::new(data, file);
        if r.take(8)? != PARTITION_MAGIC {
            return Err(StorageError::InvalidMagic(file.to_string()));
        }
        let version = r.u32()?;
        if version != BINARY_VERSION {
            return Err(StorageError::UnsupportedVersion(version));
        }
        let stored_dim = r.u32()? as usize;
        if stored_dim != dim {
            return Err(StorageError::Corrupt(format!(
                "{}: dimension {} disagrees with manifest {}",
                file, stored_dim, dim
            )));
        }
        let id = PartitionId(r.u32()?);
        let count = r.u32()? as usize;

        let expected = PARTITION_HEADER_SIZE + dim * 4 + count * (8 + dim * 4);
        if data.len() != expected {
            return Err(StorageError::Corrupt(format!(
                "{}: length {} does not match {} members (expected {} bytes)",
                file,
                data.len(),
                count,
                expected
            )));
        }

        let centroid = r.f32s(dim)?;
        let mut ids = Vec::with_capacity(count);
        let mut vectors = Vec::with_capacity(count * dim);
        for _ in 0..count {
            ids.push(VectorId(r.i64()?));
            vectors.extend(r.f32s(dim)?);
        }

        Ok(Self {
            id,
            centroid,
            ids,
            vectors,
        })
    }
}

pub fn partition_file_name(id: PartitionId) -> String {
    format!("part-{:08}.bin", id.0)
}

/// One row of the id index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdIndexEntry {
    pub id: VectorId,
    /// `None` for a deleted id.
    pub partition: Option<PartitionId>,
    pub offset: u32,
}

impl IdIndexEntry {
    pub fn live(id: VectorId, partition: PartitionId, offset: u32) -> Self {
        Self {
            id,
            partition: Some(partition),
            offset,
        }
    }

    pub fn tombstone(id: VectorId) -> Self {
        Self {
            id,
            partition: None,
            offset: 0,
        }
    }
}

/// Encode the id index. Entries are sorted by id before writing.
pub fn encode_id_index(entries: &mut [IdIndexEntry]) -> Vec<u8> {
    entries.sort_unstable_by_key(|e| e.id);
    let mut buf = Vec::with_capacity(ID_INDEX_HEADER_SIZE + entries.len() * ID_INDEX_ENTRY_SIZE);
    buf.extend_from_slice(ID_INDEX_MAGIC);
    buf.extend_from_slice(&BINARY_VERSION.to_le_bytes());
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    for e in entries.iter() {
        buf.extend_from_slice(&e.id.0.to_le_bytes());
        let partition = e.partition.map(|p| p.0).unwrap_or(TOMBSTONE_PARTITION);
        buf.extend_from_slice(&partition.to_le_bytes());
        buf.extend_from_slice(&e.offset.to_le_bytes());
    }
    buf
}

/// Decode the id index, rejecting unsorted or duplicate ids.
pub fn decode_id_index(data: &[u8], file: &str) -> StorageResult<Vec<IdIndexEntry>> {
    let mut r = Reader::new(data, file);
    if r.take(8)? != ID_INDEX_MAGIC {
        return Err(StorageError::InvalidMagic(file.to_string()));
    }
    let version = r.u32()?;
    if version != BINARY_VERSION {
        return Err(StorageError::UnsupportedVersion(version));
    }
    let count = r.u32()? as usize;
    if data.len() != ID_INDEX_HEADER_SIZE + count * ID_INDEX_ENTRY_SIZE {
        return Err(StorageError::Corrupt(format!(
            "{}: length {} does not match {} entries",
            file,
            data.len(),
            count
        )));
    }

    let mut entries = Vec::with_capacity(count);
    let mut prev: Option<VectorId> = None;
    for _ in 0..count {
        let id = VectorId(r.i64()?);
        let partition = r.u32()?;
        let offset = r.u32()?;
        if prev.is_some_and(|p| p >= id) {
            return Err(StorageError::Corrupt(format!(
                "{}: ids not strictly increasing at {}",
                file, id
            )));
        }
        prev = Some(id);
        entries.push(IdIndexEntry {
            id,
            partition: (partition != TOMBSTONE_PARTITION).then_some(PartitionId(partition)),
            offset,
        });
    }
    Ok(entries)
}

/// Bounds-checked little-endian cursor.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    file: &'a str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], file: &'a str) -> Self {
        Self { data, pos: 0, file }
    }

    fn take(&mut self, n: usize) -> StorageResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&end| end <= self.data.len());
        let end = end.ok_or_else(|| {
            StorageError::Corrupt(format!("{}: truncated at byte {}", self.file, self.pos))
        })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn array<const N: usize>(&mut self) -> StorageResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u32(&mut self) -> StorageResult<u32> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> StorageResult<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn f32s(&mut self, n: usize) -> StorageResult<Vec<f32>> {
        let bytes = self.take(n * 4)?;
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }
}
