//! Append-oriented vector store.
//!
//! Owns the authoritative `id -> vector` mapping. Vectors live row-major in a
//! single buffer addressed by [`Location`]; deletes only set a tombstone so
//! locations held by the partition table never move during a session.

use crate::error::{StorageError, StorageResult};
use spfresh_core::{distance, Location, VectorId};
use std::collections::{HashMap, HashSet};

/// Ids live in `0..i64::MAX` so `next_auto_id` can always exceed them.
fn is_valid_id(id: VectorId) -> bool {
    (0..i64::MAX).contains(&id.0)
}

#[derive(Debug, Clone)]
pub struct VectorStore {
    dim: usize,
    data: Vec<f32>,
    ids: Vec<VectorId>,
    norms: Vec<f32>,
    tombstoned: Vec<bool>,
    /// Every id ever appended this session, live or tombstoned.
    by_id: HashMap<VectorId, Location>,
    /// Ids deleted in earlier sessions. Reserved forever.
    retired: HashSet<VectorId>,
    next_auto_id: i64,
    live: usize,
}

impl VectorStore {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            data: Vec::new(),
            ids: Vec::new(),
            norms: Vec::new(),
            tombstoned: Vec::new(),
            by_id: HashMap::new(),
            retired: HashSet::new(),
            next_auto_id: 0,
            live: 0,
        }
    }

    /// Rebuild an empty store that remembers ids retired by earlier sessions.
    pub fn with_history(
        dim: usize,
        retired: impl IntoIterator<Item = VectorId>,
        next_auto_id: i64,
    ) -> Self {
        let mut store = Self::new(dim);
        store.retired = retired.into_iter().collect();
        let max_retired = store
            .retired
            .iter()
            .map(|id| id.0.saturating_add(1))
            .max()
            .unwrap_or(0);
        store.next_auto_id = next_auto_id.max(max_retired);
        store
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Number of allocated slots, including tombstones.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn tombstone_count(&self) -> usize {
        self.len() - self.live
    }

    pub fn next_auto_id(&self) -> i64 {
        self.next_auto_id
    }

    /// Check a whole batch without mutating anything.
    ///
    /// `vectors` is row-major with `n * dim` components. Returns `n`.
    pub fn validate_batch(&self, vectors: &[f32], ids: Option<&[VectorId]>) -> StorageResult<usize> {
        if self.dim == 0 || vectors.len() % self.dim != 0 {
            return Err(StorageError::InvalidDimension {
                expected: self.dim,
                got: vectors.len() % self.dim.max(1),
            });
        }
        let n = vectors.len() / self.dim;

        if let Some(row) = vectors
            .chunks_exact(self.dim)
            .position(|row| row.iter().any(|x| !x.is_finite()))
        {
            return Err(StorageError::NonFinite { row });
        }

        if let Some(ids) = ids {
            if ids.len() != n {
                return Err(StorageError::BatchLength { vectors: n, ids: ids.len() });
            }
            let mut seen = HashSet::with_capacity(n);
            for &id in ids {
                if !is_valid_id(id) {
                    return Err(StorageError::InvalidId(id.0));
                }
                if self.contains_id(id) || !seen.insert(id) {
                    return Err(StorageError::DuplicateId(id));
                }
            }
        }

        Ok(n)
    }

    /// Reserve room for `additional` rows, reporting allocation failure instead of aborting.
    pub fn try_reserve(&mut self, additional: usize) -> StorageResult<()> {
        if self.len() + additional > u32::MAX as usize {
            return Err(StorageError::OutOfMemory("location space exhausted".into()));
        }
        let floats = additional
            .checked_mul(self.dim)
            .ok_or_else(|| StorageError::OutOfMemory("batch too large".into()))?;
        self.data.try_reserve(floats)?;
        self.ids.try_reserve(additional)?;
        self.norms.try_reserve(additional)?;
        self.tombstoned.try_reserve(additional)?;
        self.by_id.try_reserve(additional)?;
        Ok(())
    }

    /// Append one vector, assigning an id when none is supplied.
    pub fn append(
        &mut self,
        vector: &[f32],
        id: Option<VectorId>,
    ) -> StorageResult<(VectorId, Location)> {
        if vector.len() != self.dim {
            return Err(StorageError::InvalidDimension {
                expected: self.dim,
                got: vector.len(),
            });
        }
        if self.len() >= u32::MAX as usize {
            return Err(StorageError::OutOfMemory("location space exhausted".into()));
        }

        let id = match id {
            Some(id) if !is_valid_id(id) => return Err(StorageError::InvalidId(id.0)),
            Some(id) if self.contains_id(id) => return Err(StorageError::DuplicateId(id)),
            Some(id) => id,
            None => self.allocate_id()?,
        };
        self.next_auto_id = self.next_auto_id.max(id.0 + 1);

        let location = Location(self.ids.len() as u32);
        self.data.extend_from_slice(vector);
        self.ids.push(id);
        self.norms.push(distance::l2_norm(vector));
        self.tombstoned.push(false);
        self.by_id.insert(id, location);
        self.live += 1;

        Ok((id, location))
    }

    fn allocate_id(&self) -> StorageResult<VectorId> {
        let mut candidate = self.next_auto_id;
        while is_valid_id(VectorId(candidate)) {
            if !self.contains_id(VectorId(candidate)) {
                return Ok(VectorId(candidate));
            }
            candidate += 1;
        }
        Err(StorageError::OutOfMemory("id space exhausted".into()))
    }

    /// Vector at `location`, or `None` when out of range or tombstoned.
    pub fn get(&self, location: Location) -> Option<&[f32]> {
        if !self.is_live(location) {
            return None;
        }
        Some(self.vector(location))
    }

    /// Raw row access for internal scans. Callers pass locations they own.
    #[inline]
    pub fn vector(&self, location: Location) -> &[f32] {
        let start = location.index() * self.dim;
        &self.data[start..start + self.dim]
    }

    #[inline]
    pub fn norm(&self, location: Location) -> f32 {
        self.norms[location.index()]
    }

    #[inline]
    pub fn id_at(&self, location: Location) -> VectorId {
        self.ids[location.index()]
    }

    pub fn is_live(&self, location: Location) -> bool {
        self.tombstoned
            .get(location.index())
            .map(|dead| !dead)
            .unwrap_or(false)
    }

    /// Location of a live entry.
    pub fn lookup_id(&self, id: VectorId) -> Option<Location> {
        self.by_id
            .get(&id)
            .copied()
            .filter(|&loc| self.is_live(loc))
    }

    /// Whether the id was ever used by this index, live or deleted.
    pub fn contains_id(&self, id: VectorId) -> bool {
        self.by_id.contains_key(&id) || self.retired.contains(&id)
    }

    /// Logically delete an entry. The id stays reserved.
    pub fn tombstone(&mut self, id: VectorId) -> StorageResult<Location> {
        let location = self.lookup_id(id).ok_or(StorageError::UnknownId(id))?;
        self.tombstoned[location.index()] = true;
        self.live -= 1;
        Ok(location)
    }

    /// Drop every slot at or after `len` and restore the auto-id counter.
    ///
    /// Used to roll back a batch that failed part-way through.
    pub fn truncate(&mut self, len: usize, next_auto_id: i64) {
        if len >= self.len() {
            return;
        }
        for idx in len..self.ids.len() {
            self.by_id.remove(&self.ids[idx]);
            if !self.tombstoned[idx] {
                self.live -= 1;
            }
        }
        self.data.truncate(len * self.dim);
        self.ids.truncate(len);
        self.norms.truncate(len);
        self.tombstoned.truncate(len);
        self.next_auto_id = next_auto_id;
    }

    /// Locations of all live entries in ascending order.
    pub fn live_locations(&self) -> impl Iterator<Item = Location> + '_ {
        self.tombstoned
            .iter()
            .enumerate()
            .filter(|(_, dead)| !**dead)
            .map(|(i, _)| Location(i as u32))
    }

    /// Ids that can never be reused: deleted this session or in earlier ones.
    pub fn reserved_ids(&self) -> Vec<VectorId> {
        let mut out: Vec<VectorId> = self
            .ids
            .iter()
            .zip(&self.tombstoned)
            .filter(|(_, dead)| **dead)
            .map(|(id, _)| *id)
            .chain(self.retired.iter().copied())
            .collect();
        out.sort_unstable();
        out
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_usage(&self) -> usize {
        self.data.capacity() * std::mem::size_of::<f32>()
            + self.ids.capacity() * std::mem::size_of::<VectorId>()
            + self.norms.capacity() * std::mem::size_of::<f32>()
            + self.tombstoned.capacity()
            + self.by_id.capacity() * (std::mem::size_of::<VectorId>() + std::mem::size_of::<Location>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_and_lookup() {
        let mut store = VectorStore::new(2);
        let (id0, loc0) = store.append(&[1.0, 2.0], None).unwrap();
        let (id1, loc1) = store.append(&[3.0, 4.0], Some(VectorId(10))).unwrap();

        assert_eq!(id0, VectorId(0));
        assert_eq!(id1, VectorId(10));
        assert_eq!(store.get(loc0), Some(&[1.0, 2.0][..]));
        assert_eq!(store.lookup_id(VectorId(10)), Some(loc1));
        assert_eq!(store.lookup_id(VectorId(3)), None);
        assert_eq!(store.live_count(), 2);

        // caller ids push the auto counter past them
        let (id2, _) = store.append(&[0.0, 0.0], None).unwrap();
        assert_eq!(id2, VectorId(11));
    }

    #[test]
    fn test_rejects_wrong_dimension() {
        let mut store = VectorStore::new(3);
        let err = store.append(&[1.0, 2.0], None).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDimension { expected: 3, got: 2 }));
        assert!(store.is_empty());
    }

    #[test]
    fn test_duplicate_id_leaves_store_unchanged() {
        let mut store = VectorStore::new(1);
        store.append(&[1.0], Some(VectorId(5))).unwrap();
        let err = store.append(&[2.0], Some(VectorId(5))).unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId(VectorId(5))));
        assert_eq!(store.len(), 1);
        assert_eq!(store.vector(Location(0)), &[1.0]);
    }

    #[test]
    fn test_validate_batch() {
        let mut store = VectorStore::new(2);
        store.append(&[0.0, 0.0], Some(VectorId(1))).unwrap();

        assert_eq!(store.validate_batch(&[1.0, 2.0, 3.0, 4.0], None).unwrap(), 2);
        assert!(matches!(
            store.validate_batch(&[1.0, 2.0, 3.0], None),
            Err(StorageError::InvalidDimension { .. })
        ));
        assert!(matches!(
            store.validate_batch(&[1.0, 2.0, 3.0, 4.0], Some(&[VectorId(2), VectorId(2)])),
            Err(StorageError::DuplicateId(VectorId(2)))
        ));
        assert!(matches!(
            store.validate_batch(&[1.0, 2.0], Some(&[VectorId(1)])),
            Err(StorageError::DuplicateId(VectorId(1)))
        ));
        assert!(matches!(
            store.validate_batch(&[1.0, 2.0], Some(&[VectorId(-4)])),
            Err(StorageError::InvalidId(-4))
        ));
        assert!(matches!(
            store.validate_batch(&[1.0, f32::NAN], None),
            Err(StorageError::NonFinite { row: 0 })
        ));
        assert!(matches!(
            store.validate_batch(&[1.0, 2.0], Some(&[])),
            Err(StorageError::BatchLength { vectors: 1, ids: 0 })
        ));
    }

    #[test]
    fn test_id_space_upper_bound() {
        let mut store = VectorStore::new(1);
        assert!(matches!(
            store.validate_batch(&[1.0], Some(&[VectorId(i64::MAX)])),
            Err(StorageError::InvalidId(i64::MAX))
        ));
        assert!(matches!(
            store.append(&[1.0], Some(VectorId(i64::MAX))),
            Err(StorageError::InvalidId(_))
        ));

        store.append(&[1.0], Some(VectorId(i64::MAX - 1))).unwrap();
        assert_eq!(store.next_auto_id(), i64::MAX);
        assert!(matches!(
            store.append(&[2.0], None),
            Err(StorageError::OutOfMemory(_))
        ));
        assert_eq!(store.len(), 1);

        // ids below the top of the range are still accepted
        store.append(&[3.0], Some(VectorId(0))).unwrap();
        assert_eq!(store.live_count(), 2);
    }

    #[test]
    fn test_tombstone_keeps_id_reserved() {
        let mut store = VectorStore::new(1);
        let (_, loc) = store.append(&[1.0], Some(VectorId(7))).unwrap();
        store.tombstone(VectorId(7)).unwrap();

        assert!(!store.is_live(loc));
        assert_eq!(store.get(loc), None);
        assert_eq!(store.lookup_id(VectorId(7)), None);
        assert_eq!(store.live_count(), 0);
        assert_eq!(store.tombstone_count(), 1);
        assert!(matches!(
            store.append(&[2.0], Some(VectorId(7))),
            Err(StorageError::DuplicateId(_))
        ));
        assert!(matches!(store.tombstone(VectorId(7)), Err(StorageError::UnknownId(_))));
        assert_eq!(store.reserved_ids(), vec![VectorId(7)]);
    }

    #[test]
    fn test_truncate_rolls_back() {
        let mut store = VectorStore::new(1);
        store.append(&[1.0], None).unwrap();
        let mark = (store.len(), store.next_auto_id());
        store.append(&[2.0], None).unwrap();
        store.append(&[3.0], Some(VectorId(40))).unwrap();

        store.truncate(mark.0, mark.1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.live_count(), 1);
        assert!(!store.contains_id(VectorId(40)));
        assert_eq!(store.append(&[4.0], None).unwrap().0, VectorId(1));
    }

    #[test]
    fn test_history_reserves_retired_ids() {
        let mut store = VectorStore::with_history(1, [VectorId(0), VectorId(3)], 2);
        assert_eq!(store.next_auto_id(), 4);
        assert!(matches!(
            store.append(&[1.0], Some(VectorId(3))),
            Err(StorageError::DuplicateId(_))
        ));
        assert_eq!(store.append(&[1.0], None).unwrap().0, VectorId(4));
    }
}
