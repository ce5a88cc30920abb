//! Partition table: centroids, posting lists, and nearest-centroid routing.

use spfresh_core::{Location, Metric, PartitionId};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

/// A cluster of vectors and its representative centroid.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    id: PartitionId,
    centroid: Vec<f32>,
    members: Vec<Location>,
}

impl Partition {
    pub fn new(id: PartitionId, centroid: Vec<f32>, members: Vec<Location>) -> Self {
        Self {
            id,
            centroid,
            members,
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    /// Posting list.
    pub fn members(&self) -> &[Location] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Fold one vector into the running mean of the centroid.
    fn absorb(&mut self, location: Location, vector: &[f32]) {
        self.members.push(location);
        let n = self.members.len() as f32;
        for (c, &x) in self.centroid.iter_mut().zip(vector) {
            *c += (x - *c) / n;
        }
    }

    /// Remove one member, reversing its contribution to the running mean.
    fn release(&mut self, location: Location, vector: &[f32]) -> bool {
        let Some(pos) = self.members.iter().position(|&m| m == location) else {
            return false;
        };
        self.members.swap_remove(pos);
        let n = self.members.len() as f32;
        if n > 0.0 {
            for (c, &x) in self.centroid.iter_mut().zip(vector) {
                *c = (*c * (n + 1.0) - x) / n;
            }
        }
        true
    }
}

/// Ordered set of disjoint partitions.
///
/// Every live location belongs to exactly one partition; `owner` mirrors the
/// posting lists so the partition of an entry is found in O(1).
#[derive(Debug, Clone)]
pub struct PartitionTable {
    dim: usize,
    metric: Metric,
    partitions: BTreeMap<PartitionId, Partition>,
    owner: Vec<Option<PartitionId>>,
    next_id: u32,
    retired: Vec<PartitionId>,
    seed_partitions: usize,
}

impl PartitionTable {
    pub fn new(dim: usize, metric: Metric, seed_partitions: usize) -> Self {
        Self {
            dim,
            metric,
            partitions: BTreeMap::new(),
            owner: Vec::new(),
            next_id: 0,
            retired: Vec::new(),
            seed_partitions: seed_partitions.max(1),
        }
    }

    /// Rebuild a table from persisted partitions.
    pub fn restore(
        dim: usize,
        metric: Metric,
        seed_partitions: usize,
        partitions: Vec<Partition>,
        next_id: u32,
        retired: Vec<PartitionId>,
    ) -> Self {
        let mut table = Self::new(dim, metric, seed_partitions);
        table.next_id = next_id;
        table.retired = retired;
        for part in partitions {
            for &loc in &part.members {
                table.set_owner(loc, Some(part.id));
            }
            table.partitions.insert(part.id, part);
        }
        table
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    /// Number of active partitions.
    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn total_members(&self) -> usize {
        self.partitions.values().map(Partition::len).sum()
    }

    pub fn get(&self, id: PartitionId) -> Option<&Partition> {
        self.partitions.get(&id)
    }

    /// Partitions in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Partition> {
        self.partitions.values()
    }

    pub fn ids(&self) -> Vec<PartitionId> {
        self.partitions.keys().copied().collect()
    }

    pub fn partition_of(&self, location: Location) -> Option<PartitionId> {
        self.owner.get(location.index()).copied().flatten()
    }

    pub fn next_partition_id(&self) -> u32 {
        self.next_id
    }

    pub fn retired(&self) -> &[PartitionId] {
        &self.retired
    }

    /// Partition whose centroid is nearest to `vector`. Ties go to the lowest id.
    pub fn assign(&self, vector: &[f32]) -> Option<PartitionId> {
        self.partitions
            .values()
            .map(|p| Ranked {
                distance: self.metric.distance(vector, &p.centroid),
                id: p.id,
            })
            .min()
            .map(|r| r.id)
    }

    /// The `p` nearest partitions, ascending by centroid distance then id.
    pub fn nearest_partitions(&self, query: &[f32], p: usize) -> Vec<PartitionId> {
        self.nearest_with_distances(query, p)
            .into_iter()
            .map(|(id, _)| id)
            .collect()
    }

    pub fn nearest_with_distances(&self, query: &[f32], p: usize) -> Vec<(PartitionId, f32)> {
        let p = p.min(self.partitions.len());
        if p == 0 {
            return Vec::new();
        }

        let ranked = self.partitions.values().map(|part| Ranked {
            distance: self.metric.distance(query, &part.centroid),
            id: part.id,
        });

        let mut out: Vec<Ranked> = if p < self.partitions.len() / 2 {
            // Bounded max-heap: the worst of the current best p sits on top.
            let mut heap = BinaryHeap::with_capacity(p + 1);
            for r in ranked {
                if heap.len() < p {
                    heap.push(r);
                } else if heap.peek().is_some_and(|worst| r < *worst) {
                    heap.pop();
                    heap.push(r);
                }
            }
            heap.into_vec()
        } else {
            ranked.collect()
        };

        out.sort_unstable();
        out.truncate(p);
        out.into_iter().map(|r| (r.id, r.distance)).collect()
    }

    /// Route a newly stored vector into a partition.
    ///
    /// The first vector seeds partition 0. While fewer than `seed_partitions`
    /// ids have been allocated, a vector that differs from every centroid
    /// seeds a new partition. Otherwise the nearest partition absorbs it and
    /// its centroid moves by running mean.
    pub fn insert(&mut self, location: Location, vector: &[f32]) -> PartitionId {
        debug_assert_eq!(vector.len(), self.dim);

        let seeding = (self.next_id as usize) < self.seed_partitions
            && self.partitions.values().all(|p| p.centroid != vector);
        let target = match self.assign(vector) {
            Some(id) if !seeding => id,
            _ => {
                return self.create(vector.to_vec(), vec![location]);
            }
        };

        if let Some(part) = self.partitions.get_mut(&target) {
            part.absorb(location, vector);
        }
        self.set_owner(location, Some(target));
        target
    }

    /// Detach a location from its partition. Returns the former owner.
    pub fn remove(&mut self, location: Location, vector: &[f32]) -> Option<PartitionId> {
        let owner = self.partition_of(location)?;
        let removed = self
            .partitions
            .get_mut(&owner)
            .map(|p| p.release(location, vector))
            .unwrap_or(false);
        self.set_owner(location, None);
        removed.then_some(owner)
    }

    /// Register a new partition under a fresh id.
    pub(crate) fn create(&mut self, centroid: Vec<f32>, members: Vec<Location>) -> PartitionId {
        let id = PartitionId(self.next_id);
        self.next_id += 1;
        for &loc in &members {
            self.set_owner(loc, Some(id));
        }
        self.partitions.insert(id, Partition::new(id, centroid, members));
        id
    }

    /// Replace the posting list and centroid of an existing partition.
    pub(crate) fn replace(
        &mut self,
        id: PartitionId,
        centroid: Vec<f32>,
        members: Vec<Location>,
    ) -> bool {
        if !self.partitions.contains_key(&id) {
            return false;
        }
        for &loc in &members {
            self.set_owner(loc, Some(id));
        }
        self.partitions.insert(id, Partition::new(id, centroid, members));
        true
    }

    /// Remove a partition for good. Its id is never handed out again.
    ///
    /// Owners of its members are left untouched; callers move them first.
    pub(crate) fn retire(&mut self, id: PartitionId) -> Option<Partition> {
        let part = self.partitions.remove(&id)?;
        self.retired.push(id);
        Some(part)
    }

    /// Forget every location at or after `len`.
    ///
    /// Used when a failed batch is rolled back; the locations must already
    /// have been removed from their partitions.
    pub fn truncate_owners(&mut self, len: usize) {
        self.owner.truncate(len);
    }

    /// Drop empty partitions allocated at or after `first` and hand their
    /// ids out again. Returns how many were dropped.
    ///
    /// Only for rolling back a batch: the ids were never visible outside it.
    pub fn discard_since(&mut self, first: u32) -> usize {
        let empty: Vec<PartitionId> = self
            .partitions
            .range(PartitionId(first)..)
            .filter(|(_, p)| p.is_empty())
            .map(|(id, _)| *id)
            .collect();
        for id in &empty {
            self.partitions.remove(id);
        }
        self.next_id = self
            .partitions
            .keys()
            .next_back()
            .map_or(first, |last| (last.0 + 1).max(first));
        self.retired.retain(|id| id.0 < self.next_id);
        empty.len()
    }

    pub(crate) fn owners(&self) -> &[Option<PartitionId>] {
        &self.owner
    }

    fn set_owner(&mut self, location: Location, id: Option<PartitionId>) {
        let idx = location.index();
        if idx >= self.owner.len() {
            self.owner.resize(idx + 1, None);
        }
        self.owner[idx] = id;
    }
}

/// Centroid candidate ordered by distance, then id.
#[derive(Debug, Clone, Copy)]
struct Ranked {
    distance: f32,
    id: PartitionId,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(centroids: &[&[f32]]) -> PartitionTable {
        let dim = centroids[0].len();
        let parts = centroids
            .iter()
            .enumerate()
            .map(|(i, c)| Partition::new(PartitionId(i as u32), c.to_vec(), Vec::new()))
            .collect();
        PartitionTable::restore(dim, Metric::L2, 1, parts, centroids.len() as u32, Vec::new())
    }

    #[test]
    fn test_lazy_initialization() {
        let mut table = PartitionTable::new(2, Metric::L2, 1);
        assert!(table.is_empty());
        assert_eq!(table.assign(&[1.0, 1.0]), None);

        let pid = table.insert(Location(0), &[1.0, 1.0]);
        assert_eq!(pid, PartitionId(0));
        assert_eq!(table.get(pid).unwrap().centroid(), &[1.0, 1.0]);

        // single seed: everything else joins partition 0
        assert_eq!(table.insert(Location(1), &[9.0, 9.0]), PartitionId(0));
        assert_eq!(table.len(), 1);
        assert_eq!(table.partition_of(Location(1)), Some(PartitionId(0)));
    }

    #[test]
    fn test_running_mean() {
        let mut table = PartitionTable::new(1, Metric::L2, 1);
        table.insert(Location(0), &[0.0]);
        table.insert(Location(1), &[2.0]);
        table.insert(Location(2), &[4.0]);
        let c = table.get(PartitionId(0)).unwrap().centroid()[0];
        assert!((c - 2.0).abs() < 1e-6);

        table.remove(Location(2), &[4.0]);
        let c = table.get(PartitionId(0)).unwrap().centroid()[0];
        assert!((c - 1.0).abs() < 1e-6);
        assert_eq!(table.partition_of(Location(2)), None);
        assert_eq!(table.total_members(), 2);
    }

    #[test]
    fn test_seed_partitions() {
        let mut table = PartitionTable::new(1, Metric::L2, 3);
        assert_eq!(table.insert(Location(0), &[0.0]), PartitionId(0));
        // identical vector does not seed
        assert_eq!(table.insert(Location(1), &[0.0]), PartitionId(0));
        assert_eq!(table.insert(Location(2), &[10.0]), PartitionId(1));
        assert_eq!(table.insert(Location(3), &[20.0]), PartitionId(2));
        // seeds exhausted
        assert_eq!(table.insert(Location(4), &[19.0]), PartitionId(2));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn test_assign_tie_breaks_on_lowest_id() {
        let table = table_with(&[&[1.0, 0.0], &[-1.0, 0.0], &[0.0, 5.0]]);
        // equidistant from partitions 0 and 1
        assert_eq!(table.assign(&[0.0, 0.0]), Some(PartitionId(0)));
        assert_eq!(
            table.nearest_partitions(&[0.0, 0.0], 2),
            vec![PartitionId(0), PartitionId(1)]
        );
    }

    #[test]
    fn test_nearest_partitions_ordering() {
        let centroids: Vec<Vec<f32>> = (0..10).map(|i| vec![i as f32]).collect();
        let refs: Vec<&[f32]> = centroids.iter().map(|c| c.as_slice()).collect();
        let table = table_with(&refs);

        // heap path (p < len / 2)
        let near = table.nearest_partitions(&[6.2], 3);
        assert_eq!(near, vec![PartitionId(6), PartitionId(7), PartitionId(5)]);

        // sort path
        let all = table.nearest_partitions(&[0.0], 100);
        assert_eq!(all.len(), 10);
        assert_eq!(all[0], PartitionId(0));
        assert_eq!(all[9], PartitionId(9));

        assert!(table.nearest_partitions(&[0.0], 0).is_empty());
    }

    #[test]
    fn test_retired_ids_are_not_reused() {
        let mut table = PartitionTable::new(1, Metric::L2, 1);
        table.insert(Location(0), &[0.0]);
        let b = table.create(vec![5.0], vec![Location(1)]);
        assert_eq!(b, PartitionId(1));
        table.retire(b).unwrap();
        let c = table.create(vec![7.0], vec![Location(1)]);
        assert_eq!(c, PartitionId(2));
        assert_eq!(table.retired(), &[PartitionId(1)]);
    }

    #[test]
    fn test_rollback_helpers() {
        let mut table = PartitionTable::new(1, Metric::L2, 2);
        table.insert(Location(0), &[0.0]);
        let first = table.next_partition_id();
        table.insert(Location(1), &[4.0]);
        assert_eq!(table.len(), 2);

        table.remove(Location(1), &[4.0]);
        table.truncate_owners(1);
        assert_eq!(table.discard_since(first), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.next_partition_id(), first);
        assert!(table.retired().is_empty());
        assert_eq!(table.partition_of(Location(1)), None);
        assert_eq!(table.partition_of(Location(0)), Some(PartitionId(0)));
    }
}
