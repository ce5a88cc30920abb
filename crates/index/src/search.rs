//! Probe-limited top-k search over the partition table.

use crate::error::{IndexError, IndexResult};
use crate::partition::PartitionTable;
use rayon::prelude::*;
use spfresh_core::{distance, Location, Metric, VectorId};
use spfresh_storage::VectorStore;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Scans smaller than this many vectors stay on the calling thread.
const PARALLEL_SCAN_THRESHOLD: usize = 4096;

/// A search hit. `distance` is the metric's distance; lower is closer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub id: VectorId,
    pub distance: f32,
}

/// Max-heap entry: the worst of the current top-k sits on top.
///
/// Ordered by distance, then id, so equal distances resolve the same way on
/// every run regardless of scan order.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    distance: f32,
    id: VectorId,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

struct TopK {
    k: usize,
    heap: BinaryHeap<HeapEntry>,
}

impl TopK {
    /// `expected` bounds the preallocation; `k` may far exceed what exists.
    fn new(k: usize, expected: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k.min(expected)),
        }
    }

    fn push(&mut self, entry: HeapEntry) {
        if self.heap.len() < self.k {
            self.heap.push(entry);
        } else if self.heap.peek().is_some_and(|worst| entry < *worst) {
            self.heap.pop();
            self.heap.push(entry);
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        if self.heap.is_empty() {
            return other;
        }
        for entry in other.heap {
            self.push(entry);
        }
        self
    }

    fn into_sorted(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|e| Neighbor {
                id: e.id,
                distance: e.distance,
            })
            .collect()
    }
}

fn scan(
    store: &VectorStore,
    metric: Metric,
    query: &[f32],
    query_norm: f32,
    members: &[Location],
    k: usize,
) -> TopK {
    let mut top = TopK::new(k, members.len());
    for &loc in members {
        if !store.is_live(loc) {
            continue;
        }
        let dist = metric.distance_with_norms(query, query_norm, store.vector(loc), store.norm(loc));
        top.push(HeapEntry {
            distance: dist,
            id: store.id_at(loc),
        });
    }
    top
}

fn check_query(dim: usize, query: &[f32], k: usize) -> IndexResult<()> {
    if k == 0 {
        return Err(IndexError::InvalidTopK(0));
    }
    if query.len() != dim {
        return Err(IndexError::InvalidDimension {
            expected: dim,
            got: query.len(),
        });
    }
    Ok(())
}

/// Up to `k` nearest live vectors among the `probe_count` partitions whose
/// centroids are nearest to `query`, ascending by (distance, id).
///
/// Probing every partition makes the result exact.
pub fn search(
    table: &PartitionTable,
    store: &VectorStore,
    query: &[f32],
    k: usize,
    probe_count: usize,
) -> IndexResult<Vec<Neighbor>> {
    check_query(table.dim(), query, k)?;
    if table.is_empty() {
        return Ok(Vec::new());
    }

    let metric = table.metric();
    let query_norm = distance::l2_norm(query);
    let probed: Vec<&[Location]> = table
        .nearest_partitions(query, probe_count.max(1))
        .into_iter()
        .filter_map(|pid| table.get(pid))
        .map(|p| p.members())
        .collect();
    let scanned: usize = probed.iter().map(|m| m.len()).sum();

    let top = if probed.len() > 1 && scanned >= PARALLEL_SCAN_THRESHOLD {
        probed
            .par_iter()
            .map(|members| scan(store, metric, query, query_norm, members, k))
            .reduce(|| TopK::new(k, 0), TopK::merge)
    } else {
        probed
            .iter()
            .map(|members| scan(store, metric, query, query_norm, members, k))
            .fold(TopK::new(k, 0), TopK::merge)
    };

    tracing::trace!(
        probed = probed.len(),
        scanned,
        hits = top.heap.len(),
        "Search"
    );
    Ok(top.into_sorted())
}

/// Exhaustive search over every live vector in the store.
pub fn brute_force_search(
    store: &VectorStore,
    metric: Metric,
    query: &[f32],
    k: usize,
) -> IndexResult<Vec<Neighbor>> {
    check_query(store.dim(), query, k)?;
    let query_norm = distance::l2_norm(query);
    let live: Vec<Location> = store.live_locations().collect();
    Ok(scan(store, metric, query, query_norm, &live, k).into_sorted())
}
