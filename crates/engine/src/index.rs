//! The index façade.
//!
//! One `parking_lot::RwLock` guards the vector store and partition table
//! together. `add`, `remove`, and `maintain` take it exclusively; `search`,
//! `get`, `stats`, `verify`, and the capture phase of `save` share it. Disk
//! I/O of `save` happens after the lock is released, serialized by a
//! separate save mutex so two saves never interleave their commits.

use crate::error::{EngineError, EngineResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use spfresh_core::{IndexParams, Location, Metric, ParamError, PartitionId, VectorId};
use spfresh_index::{
    persist, rebalance, search, Neighbor, PartitionTable, RebalanceConfig, RebalanceReport,
    Rebalancer,
};
use spfresh_storage::{SnapshotStore, StorageError, VectorStore};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

struct State {
    store: VectorStore,
    table: PartitionTable,
}

/// State shared with the idle-tick thread.
struct Core {
    state: RwLock<State>,
    rebalancer: Rebalancer,
}

impl Core {
    fn maintain(&self) -> EngineResult<RebalanceReport> {
        let mut guard = self.state.write();
        let State { store, table } = &mut *guard;
        Ok(self.rebalancer.idle(table, store)?)
    }
}

/// Background thread running the idle rebalance on a fixed period.
///
/// Dropping the ticker disconnects its channel, which wakes and stops the
/// thread; the drop then waits for it to finish.
struct Ticker {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Ticker {
    fn spawn(core: Weak<Core>, period: Duration) -> EngineResult<Self> {
        let (stop, rx) = mpsc::channel::<()>();
        let handle = thread::Builder::new()
            .name("spfresh-idle".into())
            .spawn(move || loop {
                match rx.recv_timeout(period) {
                    Err(RecvTimeoutError::Timeout) => {
                        let Some(core) = core.upgrade() else { break };
                        if let Err(e) = core.maintain() {
                            tracing::warn!(error = %e, "Idle rebalance failed");
                        }
                    }
                    _ => break,
                }
            })
            .map_err(|e| EngineError::Internal(format!("spawn idle thread: {}", e)))?;
        Ok(Self {
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Idle rebalance thread panicked");
            }
        }
    }
}

/// Summary of an index's contents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub dim: usize,
    pub metric: Metric,
    pub live_vectors: usize,
    pub tombstoned_vectors: usize,
    pub partitions: usize,
    pub min_partition_size: usize,
    pub max_partition_size: usize,
    pub mean_partition_size: f64,
    pub next_auto_id: i64,
    pub memory_bytes: usize,
}

/// A persistent, updatable partitioned vector index.
///
/// Nothing is written to disk implicitly: call [`Index::save`] before
/// [`Index::close`] (or drop) to keep changes.
pub struct Index {
    dir: PathBuf,
    dim: usize,
    params: IndexParams,
    core: Arc<Core>,
    snapshots: SnapshotStore,
    save_lock: Mutex<()>,
    ticker: Mutex<Option<Ticker>>,
}

impl Index {
    /// Open or create an index, parsing `params` as a `key=value` string.
    pub fn open(dir: impl AsRef<Path>, dim: usize, params: &str) -> EngineResult<Self> {
        Self::open_with(dir, dim, IndexParams::parse(params)?)
    }

    /// Open the index stored in `dir`, or start a new one.
    ///
    /// A directory without a committed snapshot opens as an empty index. A
    /// missing directory is created unless `params.create` is false.
    pub fn open_with(dir: impl AsRef<Path>, dim: usize, mut params: IndexParams) -> EngineResult<Self> {
        params.validate()?;
        if dim == 0 {
            return Err(EngineError::InvalidDimension(0));
        }
        let dir = dir.as_ref().to_path_buf();
        if !dir.exists() {
            if !params.create {
                return Err(EngineError::IndexNotFound(dir));
            }
            std::fs::create_dir_all(&dir).map_err(StorageError::from)?;
        }

        let snapshots = SnapshotStore::new(&dir).with_retry(
            params.save_retries,
            Duration::from_millis(params.retry_backoff_ms),
        );

        let (store, table) = match snapshots.load(Some(dim))? {
            Some(snapshot) => {
                if let Some(requested) = params.metric {
                    if requested != snapshot.metric {
                        return Err(EngineError::MetricConflict {
                            stored: snapshot.metric,
                            requested,
                        });
                    }
                }
                persist::restore(snapshot, params.seed_partitions)?
            }
            None => (
                VectorStore::new(dim),
                PartitionTable::new(dim, params.metric_or_default(), params.seed_partitions),
            ),
        };
        let metric = table.metric();
        params.metric = Some(metric);

        tracing::info!(
            dir = %dir.display(),
            dim,
            metric = %metric,
            vectors = store.live_count(),
            partitions = table.len(),
            "Opened index"
        );

        let core = Arc::new(Core {
            state: RwLock::new(State { store, table }),
            rebalancer: Rebalancer::new(RebalanceConfig::from(&params)),
        });
        let ticker = if params.idle_rebalance_ms > 0 {
            let period = Duration::from_millis(params.idle_rebalance_ms);
            Some(Ticker::spawn(Arc::downgrade(&core), period)?)
        } else {
            None
        };

        Ok(Self {
            dir,
            dim,
            params,
            core,
            snapshots,
            save_lock: Mutex::new(()),
            ticker: Mutex::new(ticker),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.params.metric_or_default()
    }

    /// Effective session parameters. `metric` is always set.
    pub fn params(&self) -> &IndexParams {
        &self.params
    }

    /// Number of live vectors.
    pub fn len(&self) -> usize {
        self.core.state.read().store.live_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert a batch of row-major vectors, `n * dim` components.
    ///
    /// With `ids == None` the index assigns fresh ids. The batch is
    /// all-or-nothing: on any error the index is left as it was before the
    /// call. Returns the id of every inserted vector in input order.
    pub fn add(&self, vectors: &[f32], ids: Option<&[VectorId]>) -> EngineResult<Vec<VectorId>> {
        let mut guard = self.core.state.write();
        let state = &mut *guard;

        let n = state.store.validate_batch(vectors, ids)?;
        if n == 0 {
            return Ok(Vec::new());
        }
        state.store.try_reserve(n)?;
        let mut assigned = Vec::new();
        assigned.try_reserve_exact(n).map_err(StorageError::from)?;

        let base_len = state.store.len();
        let base_auto_id = state.store.next_auto_id();
        let base_partition = state.table.next_partition_id();

        let mut touched = Vec::new();
        for (i, row) in vectors.chunks_exact(self.dim).enumerate() {
            match state.store.append(row, ids.map(|ids| ids[i])) {
                Ok((id, loc)) => {
                    assigned.push(id);
                    touched.push(state.table.insert(loc, row));
                }
                Err(e) => {
                    rollback(state, base_len, base_auto_id, base_partition, None);
                    return Err(e.into());
                }
            }
        }

        let rebalancer = &self.core.rebalancer;
        let splitting = touched.iter().any(|&pid| {
            state
                .table
                .get(pid)
                .is_some_and(|p| rebalancer.needs_split(p.len()))
        });
        let checkpoint = splitting.then(|| state.table.clone());

        match rebalancer.after_insert(&mut state.table, &state.store, touched) {
            Ok(report) => {
                tracing::debug!(
                    added = n,
                    splits = report.splits,
                    partitions = state.table.len(),
                    "Added batch"
                );
                Ok(assigned)
            }
            Err(e) => {
                tracing::error!(error = %e, "Rebalance failed; rolling back batch");
                rollback(state, base_len, base_auto_id, base_partition, checkpoint);
                Err(e.into())
            }
        }
    }

    /// Delete vectors by id. All ids must be live; otherwise nothing is
    /// removed. Deleted ids stay reserved. Returns the number removed.
    pub fn remove(&self, ids: &[VectorId]) -> EngineResult<usize> {
        let mut guard = self.core.state.write();
        let State { store, table } = &mut *guard;

        let mut unique = ids.to_vec();
        unique.sort_unstable();
        unique.dedup();
        if let Some(&missing) = unique.iter().find(|&&id| store.lookup_id(id).is_none()) {
            return Err(StorageError::UnknownId(missing).into());
        }

        for &id in &unique {
            let loc = store.tombstone(id)?;
            table.remove(loc, store.vector(loc));
        }
        tracing::debug!(removed = unique.len(), "Removed vectors");
        Ok(unique.len())
    }

    /// The stored vector for `id`, if live.
    pub fn get(&self, id: VectorId) -> Option<Vec<f32>> {
        let state = self.core.state.read();
        let loc = state.store.lookup_id(id)?;
        state.store.get(loc).map(|v| v.to_vec())
    }

    /// The partition currently holding `id`, if live.
    pub fn partition_of(&self, id: VectorId) -> Option<PartitionId> {
        let state = self.core.state.read();
        let loc = state.store.lookup_id(id)?;
        state.table.partition_of(loc)
    }

    /// Top-`k` neighbors of `query` using the configured probe count.
    pub fn search(&self, query: &[f32], k: usize) -> EngineResult<Vec<Neighbor>> {
        self.search_with_probe(query, k, self.params.probe_count)
    }

    /// Top-`k` neighbors scanning the `probe_count` nearest partitions.
    /// A probe count at or above the partition count is exact.
    pub fn search_with_probe(
        &self,
        query: &[f32],
        k: usize,
        probe_count: usize,
    ) -> EngineResult<Vec<Neighbor>> {
        if probe_count == 0 {
            return Err(ParamError::Inconsistent(
                "probe_count must be >= 1".into(),
            )
            .into());
        }
        let state = self.core.state.read();
        Ok(search::search(&state.table, &state.store, query, k, probe_count)?)
    }

    /// Exhaustive scan of every live vector.
    pub fn brute_force_search(&self, query: &[f32], k: usize) -> EngineResult<Vec<Neighbor>> {
        let state = self.core.state.read();
        Ok(search::brute_force_search(
            &state.store,
            state.table.metric(),
            query,
            k,
        )?)
    }

    /// Run an idle rebalance pass now: merge undersized partitions, retire
    /// empty ones, and split anything oversized.
    pub fn maintain(&self) -> EngineResult<RebalanceReport> {
        self.core.maintain()
    }

    /// Persist a point-in-time snapshot to the index directory.
    pub fn save(&self) -> EngineResult<PathBuf> {
        let _saving = self.save_lock.lock();
        let snapshot = {
            let state = self.core.state.read();
            persist::capture(&state.table, &state.store, &self.params)
        };
        let path = self.snapshots.save(&snapshot)?;
        tracing::debug!(
            path = %path.display(),
            vectors = snapshot.live_count(),
            partitions = snapshot.partitions.len(),
            "Saved index"
        );
        Ok(path)
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.core.state.read();
        let sizes: Vec<usize> = state.table.iter().map(|p| p.len()).collect();
        let total: usize = sizes.iter().sum();
        IndexStats {
            dim: self.dim,
            metric: state.table.metric(),
            live_vectors: state.store.live_count(),
            tombstoned_vectors: state.store.tombstone_count(),
            partitions: sizes.len(),
            min_partition_size: sizes.iter().copied().min().unwrap_or(0),
            max_partition_size: sizes.iter().copied().max().unwrap_or(0),
            mean_partition_size: if sizes.is_empty() {
                0.0
            } else {
                total as f64 / sizes.len() as f64
            },
            next_auto_id: state.store.next_auto_id(),
            memory_bytes: state.store.memory_usage(),
        }
    }

    /// Partition sizes in partition id order.
    pub fn partition_sizes(&self) -> Vec<usize> {
        self.core.state.read().table.iter().map(|p| p.len()).collect()
    }

    /// Audit the partition table against the vector store.
    pub fn verify(&self) -> EngineResult<()> {
        let state = self.core.state.read();
        Ok(rebalance::verify(&state.table, &state.store)?)
    }

    /// Release the index without saving.
    pub fn close(self) {
        tracing::info!(dir = %self.dir.display(), "Closed index");
    }
}

impl Drop for Index {
    fn drop(&mut self) {
        self.ticker.lock().take();
    }
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("dir", &self.dir)
            .field("dim", &self.dim)
            .field("metric", &self.metric())
            .finish_non_exhaustive()
    }
}

/// Undo a partially applied batch.
///
/// `checkpoint` is the table as it stood before any split of this batch;
/// the batch's own locations are then detached and the slots truncated.
fn rollback(
    state: &mut State,
    base_len: usize,
    base_auto_id: i64,
    base_partition: u32,
    checkpoint: Option<PartitionTable>,
) {
    let State { store, table } = state;
    if let Some(saved) = checkpoint {
        *table = saved;
    }
    for idx in (base_len..store.len()).rev() {
        let loc = Location(idx as u32);
        table.remove(loc, store.vector(loc));
    }
    table.truncate_owners(base_len);
    table.discard_since(base_partition);
    store.truncate(base_len, base_auto_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_rejects_zero_dimension() {
        let dir = tempdir().unwrap();
        let err = Index::open(dir.path(), 0, "").unwrap_err();
        assert!(matches!(err, EngineError::InvalidDimension(0)));
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent");
        let err = Index::open(&path, 4, "create=false").unwrap_err();
        assert!(matches!(err, EngineError::IndexNotFound(_)));
        assert!(!path.exists());

        let index = Index::open(&path, 4, "").unwrap();
        assert!(path.is_dir());
        assert!(index.is_empty());
    }

    #[test]
    fn test_add_assigns_ids() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), 2, "").unwrap();
        let ids = index.add(&[0.0, 0.0, 1.0, 1.0], None).unwrap();
        assert_eq!(ids, vec![VectorId(0), VectorId(1)]);
        let ids = index.add(&[2.0, 2.0], Some(&[VectorId(40)])).unwrap();
        assert_eq!(ids, vec![VectorId(40)]);
        let ids = index.add(&[3.0, 3.0], None).unwrap();
        assert_eq!(ids, vec![VectorId(41)]);
        assert_eq!(index.get(VectorId(40)), Some(vec![2.0, 2.0]));
        assert_eq!(index.add(&[], None).unwrap(), Vec::new());
    }

    #[test]
    fn test_failed_batch_leaves_index_unchanged() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), 2, "seed_partitions=4").unwrap();
        index.add(&[0.0, 0.0], Some(&[VectorId(1)])).unwrap();
        let before = index.stats();

        let err = index
            .add(&[5.0, 5.0, 6.0, 6.0], Some(&[VectorId(2), VectorId(1)]))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DuplicateId);

        let err = index.add(&[5.0, f32::NAN], None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidParameter);

        let err = index.add(&[5.0, 5.0, 6.0], None).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidDimension);

        assert_eq!(index.stats(), before);
        assert_eq!(index.get(VectorId(2)), None);
        index.verify().unwrap();
    }

    #[test]
    fn test_rollback_restores_table() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), 1, "seed_partitions=2,low_watermark=0,high_watermark=4").unwrap();
        index.add(&[0.0, 1.0, 10.0], None).unwrap();
        let before = index.stats();
        let sizes = index.partition_sizes();

        {
            let mut guard = index.core.state.write();
            let state = &mut *guard;
            let base_len = state.store.len();
            let base_auto = state.store.next_auto_id();
            let base_partition = state.table.next_partition_id();
            let checkpoint = state.table.clone();
            for x in [2.0f32, 3.0, 4.0, 11.0, 12.0] {
                let (_, loc) = state.store.append(&[x], None).unwrap();
                state.table.insert(loc, &[x]);
            }
            let touched = state.table.ids();
            let report = index
                .core
                .rebalancer
                .after_insert(&mut state.table, &state.store, touched)
                .unwrap();
            assert_eq!(report.splits, 1);
            rollback(state, base_len, base_auto, base_partition, Some(checkpoint));
        }

        // capacity reserved by the batch is kept
        let strip = |s: IndexStats| IndexStats { memory_bytes: 0, ..s };
        assert_eq!(strip(index.stats()), strip(before));
        assert_eq!(index.partition_sizes(), sizes);
        index.verify().unwrap();
    }

    #[test]
    fn test_rollback_releases_seeded_partitions() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), 1, "seed_partitions=3").unwrap();
        index.add(&[0.0], None).unwrap();

        {
            let mut guard = index.core.state.write();
            let state = &mut *guard;
            let base_len = state.store.len();
            let base_auto = state.store.next_auto_id();
            let base_partition = state.table.next_partition_id();
            for x in [5.0f32, 9.0] {
                let (_, loc) = state.store.append(&[x], None).unwrap();
                state.table.insert(loc, &[x]);
            }
            assert_eq!(state.table.len(), 3);
            rollback(state, base_len, base_auto, base_partition, None);
            assert_eq!(state.table.next_partition_id(), base_partition);
            assert!(state.table.retired().is_empty());
        }

        // seeding resumes as if the batch never happened
        index.add(&[5.0, 9.0], None).unwrap();
        assert_eq!(index.partition_sizes(), vec![1, 1, 1]);
        index.verify().unwrap();
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), 1, "").unwrap();
        index.add(&[1.0, 2.0, 3.0], None).unwrap();

        let err = index.remove(&[VectorId(0), VectorId(9)]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidParameter);
        assert_eq!(index.len(), 3);

        assert_eq!(index.remove(&[VectorId(0), VectorId(0)]).unwrap(), 1);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get(VectorId(0)), None);
        index.verify().unwrap();

        // deleted ids stay reserved
        let err = index.add(&[7.0], Some(&[VectorId(0)])).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::DuplicateId);
        let hits = index.search(&[1.0], 3).unwrap();
        assert!(hits.iter().all(|h| h.id != VectorId(0)));
    }

    #[test]
    fn test_search_validation() {
        let dir = tempdir().unwrap();
        let index = Index::open(dir.path(), 3, "").unwrap();
        assert!(index.search(&[0.0; 3], 5).unwrap().is_empty());
        index.add(&[1.0, 2.0, 3.0], None).unwrap();
        assert_eq!(
            index.search(&[0.0; 3], 0).unwrap_err().kind(),
            crate::ErrorKind::InvalidTopK
        );
        assert_eq!(
            index.search(&[0.0; 2], 1).unwrap_err().kind(),
            crate::ErrorKind::InvalidDimension
        );
        assert_eq!(
            index.search_with_probe(&[0.0; 3], 1, 0).unwrap_err().kind(),
            crate::ErrorKind::InvalidParameter
        );
    }

    #[test]
    fn test_idle_ticker_merges() {
        let dir = tempdir().unwrap();
        let index = Index::open(
            dir.path(),
            1,
            "seed_partitions=3,low_watermark=2,high_watermark=8,idle_rebalance_ms=5",
        )
        .unwrap();
        index.add(&[0.0, 50.0, 100.0, 51.0, 101.0], None).unwrap();

        let mut merged = false;
        for _ in 0..400 {
            if index.stats().partitions < 3 {
                merged = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(merged, "idle tick never merged the singleton partition");
        index.verify().unwrap();
        index.close();
    }
}
