//! Conversion between the live index structures and [`Snapshot`]s.

use crate::error::IndexResult;
use crate::partition::{Partition, PartitionTable};
use spfresh_core::IndexParams;
use spfresh_storage::{PartitionRecord, Snapshot, StorageError, VectorStore};

/// Copy the table and store into a self-contained snapshot.
///
/// Only live members are written; locations are not persisted.
pub fn capture(table: &PartitionTable, store: &VectorStore, params: &IndexParams) -> Snapshot {
    let dim = table.dim();
    let partitions = table
        .iter()
        .map(|part| {
            let mut ids = Vec::with_capacity(part.len());
            let mut vectors = Vec::with_capacity(part.len() * dim);
            for &loc in part.members() {
                ids.push(store.id_at(loc));
                vectors.extend_from_slice(store.vector(loc));
            }
            PartitionRecord {
                id: part.id(),
                centroid: part.centroid().to_vec(),
                ids,
                vectors,
            }
        })
        .collect();

    let mut params = params.clone();
    params.metric = Some(table.metric());

    Snapshot {
        dim,
        metric: table.metric(),
        params,
        next_auto_id: store.next_auto_id(),
        next_partition_id: table.next_partition_id(),
        retired_partitions: table.retired().to_vec(),
        partitions,
        tombstones: store.reserved_ids(),
    }
}

/// Rebuild the store and table from a snapshot. Locations are renumbered
/// densely in partition order.
pub fn restore(
    snapshot: Snapshot,
    seed_partitions: usize,
) -> IndexResult<(VectorStore, PartitionTable)> {
    let dim = snapshot.dim;
    let mut store = VectorStore::with_history(dim, snapshot.tombstones, snapshot.next_auto_id);
    store.try_reserve(snapshot.partitions.iter().map(|p| p.len()).sum())?;

    let mut partitions = Vec::with_capacity(snapshot.partitions.len());
    for record in snapshot.partitions {
        if record.centroid.len() != dim {
            return Err(StorageError::Corrupt(format!(
                "centroid of partition {} has dimension {}",
                record.id,
                record.centroid.len()
            ))
            .into());
        }
        let mut members = Vec::with_capacity(record.len());
        for (&id, row) in record.ids.iter().zip(record.vectors.chunks_exact(dim)) {
            let (_, loc) = store.append(row, Some(id)).map_err(|e| match e {
                StorageError::DuplicateId(id) | StorageError::UnknownId(id) => {
                    StorageError::Corrupt(format!("id {} stored twice", id))
                }
                StorageError::InvalidId(id) => {
                    StorageError::Corrupt(format!("invalid id {} in snapshot", id))
                }
                other => other,
            })?;
            members.push(loc);
        }
        partitions.push(Partition::new(record.id, record.centroid, members));
    }

    let table = PartitionTable::restore(
        dim,
        snapshot.metric,
        seed_partitions,
        partitions,
        snapshot.next_partition_id,
        snapshot.retired_partitions,
    );
    Ok((store, table))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rebalance::{verify, RebalanceConfig, Rebalancer};
    use crate::search::search;
    use spfresh_core::{Metric, PartitionId, VectorId};

    #[test]
    fn test_capture_restore() {
        let mut store = VectorStore::new(2);
        let mut table = PartitionTable::new(2, Metric::Cosine, 1);
        for i in 0..30 {
            let v = [i as f32, (30 - i) as f32];
            let (_, loc) = store.append(&v, Some(VectorId(i * 2))).unwrap();
            table.insert(loc, &v);
        }
        let r = Rebalancer::new(RebalanceConfig {
            low_watermark: 4,
            high_watermark: 10,
            split_iterations: 10,
        });
        r.after_insert(&mut table, &store, [PartitionId(0)]).unwrap();
        let loc = store.tombstone(VectorId(4)).unwrap();
        let v = store.vector(loc).to_vec();
        table.remove(loc, &v);

        let snapshot = capture(&table, &store, &IndexParams::default());
        assert_eq!(snapshot.live_count(), 29);
        assert_eq!(snapshot.tombstones, vec![VectorId(4)]);
        assert_eq!(snapshot.params.metric, Some(Metric::Cosine));

        let (store2, table2) = restore(snapshot.clone(), 1).unwrap();
        verify(&table2, &store2).unwrap();
        assert_eq!(table2.len(), table.len());
        assert_eq!(store2.live_count(), 29);
        assert!(store2.contains_id(VectorId(4)));
        assert_eq!(store2.lookup_id(VectorId(4)), None);
        assert_eq!(store2.next_auto_id(), store.next_auto_id());

        // identical content produces identical snapshots and answers
        assert_eq!(capture(&table2, &store2, &IndexParams::default()), snapshot);
        let q = [3.0, 7.0];
        assert_eq!(
            search(&table, &store, &q, 5, 2).unwrap(),
            search(&table2, &store2, &q, 5, 2).unwrap()
        );
    }

    #[test]
    fn test_restore_rejects_duplicate_ids() {
        let record = |pid: u32| PartitionRecord {
            id: PartitionId(pid),
            centroid: vec![0.0],
            ids: vec![VectorId(7)],
            vectors: vec![1.0],
        };
        let snapshot = Snapshot {
            dim: 1,
            metric: Metric::L2,
            params: IndexParams::default(),
            next_auto_id: 8,
            next_partition_id: 2,
            retired_partitions: Vec::new(),
            partitions: vec![record(0), record(1)],
            tombstones: Vec::new(),
        };
        assert!(matches!(
            restore(snapshot, 1),
            Err(crate::IndexError::Storage(StorageError::Corrupt(_)))
        ));
    }
}
