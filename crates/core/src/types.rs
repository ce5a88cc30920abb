//! Identifier newtypes shared across the workspace.

use serde::{Deserialize, Serialize};
use std::fmt;

/// External identifier of a vector.
///
/// Caller-supplied ids lie in `0..i64::MAX`; `-1` marks an unused result slot
/// at the C boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VectorId(pub i64);

impl VectorId {
    /// Sentinel written into unused output slots.
    pub const NONE: VectorId = VectorId(-1);

    pub fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for VectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for VectorId {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

/// Slot of an entry inside the vector store. Stable for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Location(pub u32);

impl Location {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Partition identifier. Allocated monotonically and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}
