//! Partition rebalancing.
//!
//! A partition above the high watermark is split in two with a balanced
//! 2-means cut; a partition below the low watermark is folded into its
//! nearest sibling. Both operations check that the multiset of members is
//! unchanged before committing anything to the table.

use crate::error::{IndexError, IndexResult};
use crate::kmeans::{kmeans, KMeansConfig};
use crate::partition::PartitionTable;
use spfresh_core::{distance, IndexParams, Location, PartitionId};
use spfresh_storage::VectorStore;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceConfig {
    pub low_watermark: usize,
    pub high_watermark: usize,
    pub split_iterations: usize,
}

impl Default for RebalanceConfig {
    fn default() -> Self {
        Self::from(&IndexParams::default())
    }
}

impl From<&IndexParams> for RebalanceConfig {
    fn from(params: &IndexParams) -> Self {
        Self {
            low_watermark: params.low_watermark,
            high_watermark: params.high_watermark.max(1),
            split_iterations: params.split_iterations,
        }
    }
}

/// Counts of structural changes made by one rebalancing pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RebalanceReport {
    pub splits: usize,
    pub merges: usize,
    /// Empty partitions dropped without a merge.
    pub retired: usize,
}

impl RebalanceReport {
    pub fn is_empty(&self) -> bool {
        self.splits == 0 && self.merges == 0 && self.retired == 0
    }

    pub fn absorb(&mut self, other: RebalanceReport) {
        self.splits += other.splits;
        self.merges += other.merges;
        self.retired += other.retired;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Nothing to merge into.
    Skipped,
    /// The partition was empty and has been dropped.
    Retired,
    Merged { into: PartitionId },
}

#[derive(Debug, Clone)]
pub struct Rebalancer {
    config: RebalanceConfig,
}

impl Rebalancer {
    pub fn new(config: RebalanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RebalanceConfig {
        &self.config
    }

    pub fn needs_split(&self, len: usize) -> bool {
        len > self.config.high_watermark
    }

    pub fn needs_merge(&self, len: usize) -> bool {
        len < self.config.low_watermark
    }

    /// Split every touched partition that grew past the high watermark,
    /// repeating on halves that are still too large.
    pub fn after_insert(
        &self,
        table: &mut PartitionTable,
        store: &VectorStore,
        touched: impl IntoIterator<Item = PartitionId>,
    ) -> IndexResult<RebalanceReport> {
        let mut seen = HashSet::new();
        let queue: Vec<PartitionId> = touched.into_iter().filter(|p| seen.insert(*p)).collect();
        self.drain_splits(table, store, queue)
    }

    /// Idle pass: merge undersized partitions, drop empty ones, and split
    /// anything left oversized.
    pub fn idle(
        &self,
        table: &mut PartitionTable,
        store: &VectorStore,
    ) -> IndexResult<RebalanceReport> {
        let mut report = RebalanceReport::default();

        // Every merge removes one undersized partition without creating
        // another, so this loop ends.
        while table.len() > 1 {
            let Some(pid) = table
                .iter()
                .find(|p| p.is_empty() || self.needs_merge(p.len()))
                .map(|p| p.id())
            else {
                break;
            };
            match self.merge(table, store, pid)? {
                MergeOutcome::Skipped => break,
                MergeOutcome::Retired => report.retired += 1,
                MergeOutcome::Merged { into } => {
                    report.merges += 1;
                    report.absorb(self.drain_splits(table, store, vec![into])?);
                }
            }
        }

        let oversized: Vec<PartitionId> = table
            .iter()
            .filter(|p| self.needs_split(p.len()))
            .map(|p| p.id())
            .collect();
        report.absorb(self.drain_splits(table, store, oversized)?);

        if !report.is_empty() {
            tracing::debug!(
                splits = report.splits,
                merges = report.merges,
                retired = report.retired,
                partitions = table.len(),
                "Idle rebalance"
            );
        }
        Ok(report)
    }

    fn drain_splits(
        &self,
        table: &mut PartitionTable,
        store: &VectorStore,
        mut queue: Vec<PartitionId>,
    ) -> IndexResult<RebalanceReport> {
        let mut report = RebalanceReport::default();
        while let Some(pid) = queue.pop() {
            let oversized = table.get(pid).is_some_and(|p| self.needs_split(p.len()));
            if !oversized {
                continue;
            }
            if let Some(sibling) = self.split(table, store, pid)? {
                report.splits += 1;
                queue.push(pid);
                queue.push(sibling);
            }
        }
        Ok(report)
    }

    /// Split `pid` in two. The original id keeps one half; the other half
    /// gets a fresh id, which is returned.
    ///
    /// Members are ordered by how much closer they are to the first 2-means
    /// centroid than the second, and the cut is clamped so both halves land
    /// inside the watermarks whenever the size allows it.
    pub fn split(
        &self,
        table: &mut PartitionTable,
        store: &VectorStore,
        pid: PartitionId,
    ) -> IndexResult<Option<PartitionId>> {
        let part = table.get(pid).ok_or(IndexError::UnknownPartition(pid))?;
        let members = part.members().to_vec();
        let n = members.len();
        if n < 2 {
            return Ok(None);
        }

        let metric = table.metric();
        let vectors: Vec<&[f32]> = members.iter().map(|&loc| store.vector(loc)).collect();
        let km = kmeans(
            &vectors,
            &KMeansConfig {
                num_clusters: 2,
                max_iterations: self.config.split_iterations,
                convergence_threshold: 0.0,
                metric,
            },
        );
        let (c0, c1) = match km.centroids.as_slice() {
            [c0, c1] => (c0, c1),
            _ => return Ok(None),
        };

        let mut keyed: Vec<(f32, Location)> = vectors
            .iter()
            .zip(&members)
            .map(|(v, &loc)| (metric.distance(v, c0) - metric.distance(v, c1), loc))
            .collect();
        keyed.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let natural = km.assignments.iter().filter(|&&a| a == 0).count();
        let cut = self.balanced_cut(n, natural);

        let group_a: Vec<Location> = keyed[..cut].iter().map(|k| k.1).collect();
        let group_b: Vec<Location> = keyed[cut..].iter().map(|k| k.1).collect();
        let centroid_a = exact_centroid(store, &group_a, table.dim());
        let centroid_b = exact_centroid(store, &group_b, table.dim());

        check_same_members(&members, &[&group_a, &group_b])?;

        let (len_a, len_b) = (group_a.len(), group_b.len());
        table.replace(pid, centroid_a, group_a);
        let sibling = table.create(centroid_b, group_b);

        tracing::debug!(
            partition = %pid,
            sibling = %sibling,
            left = len_a,
            right = len_b,
            iterations = km.iterations,
            "Split partition"
        );
        Ok(Some(sibling))
    }

    /// Position of the cut between the two halves of an `n`-member split.
    fn balanced_cut(&self, n: usize, natural: usize) -> usize {
        let high = self.config.high_watermark;
        let floor = self.config.low_watermark.max(1);
        let mut lo = floor.max(n.saturating_sub(high));
        let mut hi = n.saturating_sub(floor).min(high);
        if lo > hi {
            // n > 2 * high: no cut satisfies both bounds. Keep both halves at
            // least `high` and let the queue split them again.
            lo = high;
            hi = n - high;
        }
        natural.clamp(lo, hi)
    }

    /// Fold `pid` into its nearest sibling and retire its id.
    pub fn merge(
        &self,
        table: &mut PartitionTable,
        store: &VectorStore,
        pid: PartitionId,
    ) -> IndexResult<MergeOutcome> {
        let part = table.get(pid).ok_or(IndexError::UnknownPartition(pid))?;
        if table.len() <= 1 {
            return Ok(MergeOutcome::Skipped);
        }
        if part.is_empty() {
            table.retire(pid);
            tracing::debug!(partition = %pid, "Retired empty partition");
            return Ok(MergeOutcome::Retired);
        }

        let source = part.members().to_vec();
        let Some(target) = table
            .nearest_partitions(part.centroid(), 2)
            .into_iter()
            .find(|&p| p != pid)
        else {
            return Ok(MergeOutcome::Skipped);
        };
        let existing = table
            .get(target)
            .ok_or(IndexError::UnknownPartition(target))?
            .members()
            .to_vec();

        let mut combined = existing.clone();
        combined.extend_from_slice(&source);
        check_same_members(&combined, &[&existing, &source])?;
        let centroid = exact_centroid(store, &combined, table.dim());
        let merged_len = combined.len();

        table.replace(target, centroid, combined);
        table.retire(pid);

        tracing::debug!(
            partition = %pid,
            into = %target,
            size = merged_len,
            "Merged partition"
        );
        Ok(MergeOutcome::Merged { into: target })
    }
}

fn exact_centroid(store: &VectorStore, members: &[Location], dim: usize) -> Vec<f32> {
    distance::mean(members.iter().map(|&loc| store.vector(loc)), dim)
        .unwrap_or_else(|| vec![0.0; dim])
}

/// The groups together must hold exactly the members of `before`.
fn check_same_members(before: &[Location], groups: &[&[Location]]) -> IndexResult<()> {
    let mut expected = before.to_vec();
    let mut actual: Vec<Location> = groups.iter().flat_map(|g| g.iter().copied()).collect();
    expected.sort_unstable();
    actual.sort_unstable();
    if expected != actual {
        return Err(IndexError::InvariantViolation(format!(
            "member multiset changed: {} before, {} after",
            expected.len(),
            actual.len()
        )));
    }
    Ok(())
}

/// Check the table against the store.
///
/// Every live location sits in exactly one partition, its owner entry agrees,
/// and no partition holds a tombstoned or unknown location.
pub fn verify(table: &PartitionTable, store: &VectorStore) -> IndexResult<()> {
    let mut seen = vec![false; store.len()];
    for part in table.iter() {
        if part.centroid().len() != table.dim() {
            return Err(IndexError::InvariantViolation(format!(
                "{} has a centroid of dimension {}",
                part.id(),
                part.centroid().len()
            )));
        }
        for &loc in part.members() {
            let idx = loc.index();
            if idx >= seen.len() || !store.is_live(loc) {
                return Err(IndexError::InvariantViolation(format!(
                    "{} holds dead location {}",
                    part.id(),
                    loc.0
                )));
            }
            if seen[idx] {
                return Err(IndexError::InvariantViolation(format!(
                    "location {} appears twice",
                    loc.0
                )));
            }
            seen[idx] = true;
            if table.partition_of(loc) != Some(part.id()) {
                return Err(IndexError::InvariantViolation(format!(
                    "owner of location {} disagrees with {}",
                    loc.0,
                    part.id()
                )));
            }
        }
    }

    if let Some(loc) = store.live_locations().find(|l| !seen[l.index()]) {
        return Err(IndexError::InvariantViolation(format!(
            "live location {} is in no partition",
            loc.0
        )));
    }
    if table
        .owners()
        .iter()
        .enumerate()
        .any(|(i, o)| o.is_some() && !seen.get(i).copied().unwrap_or(false))
    {
        return Err(IndexError::InvariantViolation(
            "owner map references a location outside every partition".into(),
        ));
    }
    Ok(())
}
