//! Atomic snapshot persistence.
//!
//! Directory layout:
//! ```text
//! <index_dir>/CURRENT                 name of the live snapshot directory
//! <index_dir>/snap-<gen>/MANIFEST     manifest with per-file checksums
//! <index_dir>/snap-<gen>/ids.bin      id index
//! <index_dir>/snap-<gen>/part-*.bin   one file per partition
//! ```
//!
//! A save writes `snap-<gen>.tmp/`, syncs it, renames it to `snap-<gen>/`, then
//! replaces `CURRENT` through a temp file and a rename. Until that last rename
//! lands, loads keep reading the previous snapshot.

use crate::error::{StorageError, StorageResult};
use crate::format::{self, IdIndexEntry, PartitionRecord};
use crate::manifest::{FileEntry, Manifest, FORMAT_VERSION, ID_INDEX_FILE, MANIFEST_FILE};
use memmap2::Mmap;
use spfresh_core::{IndexParams, Metric, PartitionId, VectorId};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CURRENT_FILE: &str = "CURRENT";
const SNAPSHOT_PREFIX: &str = "snap-";
const TMP_SUFFIX: &str = ".tmp";

/// Point-in-time image of an index, independent of in-memory layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub dim: usize,
    pub metric: Metric,
    pub params: IndexParams,
    pub next_auto_id: i64,
    pub next_partition_id: u32,
    pub retired_partitions: Vec<PartitionId>,
    pub partitions: Vec<PartitionRecord>,
    /// Deleted ids that stay reserved.
    pub tombstones: Vec<VectorId>,
}

impl Snapshot {
    pub fn live_count(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    fn id_index(&self) -> Vec<IdIndexEntry> {
        let mut entries = Vec::with_capacity(self.live_count() + self.tombstones.len());
        for part in &self.partitions {
            for (offset, &id) in part.ids.iter().enumerate() {
                entries.push(IdIndexEntry::live(id, part.id, offset as u32));
            }
        }
        entries.extend(self.tombstones.iter().map(|&id| IdIndexEntry::tombstone(id)));
        entries
    }
}

/// Reads and writes snapshots under one index directory.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    dir: PathBuf,
    retries: u32,
    backoff: Duration,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            retries: 0,
            backoff: Duration::from_millis(10),
        }
    }

    /// Retry transient I/O failures `retries` extra times, doubling `backoff` each time.
    pub fn with_retry(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a committed snapshot exists.
    pub fn has_snapshot(&self) -> bool {
        self.dir.join(CURRENT_FILE).is_file()
    }

    /// Persist `snapshot`, returning the committed snapshot directory.
    pub fn save(&self, snapshot: &Snapshot) -> StorageResult<PathBuf> {
        with_retries(self.retries, self.backoff, |attempt| {
            if attempt > 0 {
                tracing::info!(attempt, dir = ?self.dir, "retrying snapshot save");
            }
            self.save_once(snapshot)
        })
    }

    fn save_once(&self, snapshot: &Snapshot) -> StorageResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let generation = self.next_generation()?;
        let name = format!("{}{:08}", SNAPSHOT_PREFIX, generation);
        let final_dir = self.dir.join(&name);
        let tmp_dir = self.dir.join(format!("{}{}", name, TMP_SUFFIX));

        if tmp_dir.exists() {
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let result = self.write_snapshot_dir(snapshot, &tmp_dir).and_then(|_| {
            fs::rename(&tmp_dir, &final_dir)?;
            sync_dir(&self.dir)?;
            self.write_current(&name)
        });
        if let Err(e) = result {
            if let Err(cleanup) = fs::remove_dir_all(&tmp_dir) {
                if cleanup.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(dir = ?tmp_dir, error = %cleanup, "failed to remove partial snapshot");
                }
            }
            return Err(e);
        }

        tracing::info!(
            snapshot = %name,
            partitions = snapshot.partitions.len(),
            vectors = snapshot.live_count(),
            "saved snapshot"
        );
        self.remove_stale(&name);
        Ok(final_dir)
    }

    fn write_snapshot_dir(&self, snapshot: &Snapshot, dir: &Path) -> StorageResult<()> {
        let mut files = Vec::with_capacity(snapshot.partitions.len() + 1);

        for part in &snapshot.partitions {
            let bytes = part.to_bytes();
            let name = part.file_name();
            write_synced(&dir.join(&name), &bytes)?;
            files.push(FileEntry::for_bytes(name, &bytes));
        }

        let ids = format::encode_id_index(&mut snapshot.id_index());
        write_synced(&dir.join(ID_INDEX_FILE), &ids)?;
        files.push(FileEntry::for_bytes(ID_INDEX_FILE, &ids));

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            dim: snapshot.dim,
            metric: snapshot.metric,
            partition_count: snapshot.partitions.len(),
            live_count: snapshot.live_count(),
            next_auto_id: snapshot.next_auto_id,
            next_partition_id: snapshot.next_partition_id,
            retired_partitions: snapshot.retired_partitions.clone(),
            params: snapshot.params.clone(),
            files,
        };
        write_synced(&dir.join(MANIFEST_FILE), &manifest.to_bytes()?)?;
        sync_dir(dir)
    }

    fn write_current(&self, name: &str) -> StorageResult<()> {
        let tmp = self.dir.join(format!("{}{}", CURRENT_FILE, TMP_SUFFIX));
        write_synced(&tmp, format!("{}\n", name).as_bytes())?;
        fs::rename(&tmp, self.dir.join(CURRENT_FILE))?;
        sync_dir(&self.dir)
    }

    /// Name of the committed snapshot directory, if any.
    fn current(&self) -> StorageResult<Option<String>> {
        let path = self.dir.join(CURRENT_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let name = fs::read_to_string(&path)?.trim().to_string();
        if parse_generation(&name).is_none() {
            return Err(StorageError::Corrupt(format!("CURRENT names '{}'", name)));
        }
        Ok(Some(name))
    }

    /// One past the highest generation present, committed or not.
    fn next_generation(&self) -> StorageResult<u64> {
        let mut max = 0u64;
        for entry in fs::read_dir(&self.dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            let base = name.strip_suffix(TMP_SUFFIX).unwrap_or(&name);
            if let Some(gen) = parse_generation(base) {
                max = max.max(gen);
            }
        }
        Ok(max + 1)
    }

    /// Best-effort removal of snapshot directories other than `keep`.
    fn remove_stale(&self, keep: &str) {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dir = ?self.dir, error = %e, "cannot list snapshots for cleanup");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let base = name.strip_suffix(TMP_SUFFIX).unwrap_or(&name);
            if name == keep || parse_generation(base).is_none() {
                continue;
            }
            if let Err(e) = fs::remove_dir_all(entry.path()) {
                tracing::warn!(snapshot = %name, error = %e, "failed to remove stale snapshot");
            }
        }
    }

    /// Load the committed snapshot.
    ///
    /// Returns `Ok(None)` when the directory holds no snapshot yet. When
    /// `expected_dim` is given and differs from the stored dimension the load
    /// fails with [`StorageError::DimensionMismatch`].
    pub fn load(&self, expected_dim: Option<usize>) -> StorageResult<Option<Snapshot>> {
        let Some(name) = self.current()? else {
            return Ok(None);
        };
        let dir = self.dir.join(&name);

        let manifest_bytes = fs::read(dir.join(MANIFEST_FILE)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::Corrupt(format!("{} has no manifest", name))
            } else {
                StorageError::Io(e)
            }
        })?;
        let manifest = Manifest::from_bytes(&manifest_bytes)?;

        if let Some(requested) = expected_dim {
            if requested != manifest.dim {
                return Err(StorageError::DimensionMismatch {
                    stored: manifest.dim,
                    requested,
                });
            }
        }

        let mut partitions = Vec::with_capacity(manifest.partition_count);
        for entry in &manifest.files[..manifest.partition_count] {
            let map = map_file(&dir.join(&entry.name))?;
            entry.verify(&map)?;
            let record = PartitionRecord::from_bytes(&map, manifest.dim, &entry.name)?;
            if record.file_name() != entry.name {
                return Err(StorageError::Corrupt(format!(
                    "{} holds partition {}",
                    entry.name, record.id
                )));
            }
            partitions.push(record);
        }

        let id_entry = manifest.file(ID_INDEX_FILE)?;
        let id_map = map_file(&dir.join(ID_INDEX_FILE))?;
        id_entry.verify(&id_map)?;
        let id_index = format::decode_id_index(&id_map, ID_INDEX_FILE)?;

        let tombstones = cross_check(&manifest, &partitions, &id_index)?;

        tracing::info!(
            snapshot = %name,
            partitions = partitions.len(),
            vectors = manifest.live_count,
            "loaded snapshot"
        );

        Ok(Some(Snapshot {
            dim: manifest.dim,
            metric: manifest.metric,
            params: manifest.params,
            next_auto_id: manifest.next_auto_id,
            next_partition_id: manifest.next_partition_id,
            retired_partitions: manifest.retired_partitions,
            partitions,
            tombstones,
        }))
    }
}

/// Structural validation across manifest, partition files, and id index.
///
/// Returns the tombstoned ids.
fn cross_check(
    manifest: &Manifest,
    partitions: &[PartitionRecord],
    id_index: &[IdIndexEntry],
) -> StorageResult<Vec<VectorId>> {
    let corrupt = |msg: String| Err(StorageError::Corrupt(msg));

    let mut by_id: HashMap<PartitionId, &PartitionRecord> = HashMap::with_capacity(partitions.len());
    for part in partitions {
        if part.id.0 >= manifest.next_partition_id {
            return corrupt(format!("partition {} not below next id", part.id));
        }
        if manifest.retired_partitions.contains(&part.id) {
            return corrupt(format!("partition {} is both live and retired", part.id));
        }
        if by_id.insert(part.id, part).is_some() {
            return corrupt(format!("partition {} stored twice", part.id));
        }
    }

    let live: usize = partitions.iter().map(|p| p.len()).sum();
    if live != manifest.live_count {
        return corrupt(format!(
            "manifest counts {} vectors, partitions hold {}",
            manifest.live_count, live
        ));
    }

    let mut tombstones = Vec::new();
    let mut mapped = 0usize;
    for entry in id_index {
        let Some(pid) = entry.partition else {
            tombstones.push(entry.id);
            continue;
        };
        let Some(part) = by_id.get(&pid) else {
            return corrupt(format!("id {} points at missing partition {}", entry.id, pid));
        };
        if part.ids.get(entry.offset as usize) != Some(&entry.id) {
            return corrupt(format!(
                "id {} not found at {}[{}]",
                entry.id, pid, entry.offset
            ));
        }
        mapped += 1;
    }
    if mapped != live {
        return corrupt(format!("id index maps {} of {} vectors", mapped, live));
    }

    if let Some(max_id) = id_index.last().map(|e| e.id.0) {
        if manifest.next_auto_id <= max_id {
            return corrupt(format!(
                "next auto id {} does not exceed stored id {}",
                manifest.next_auto_id, max_id
            ));
        }
    }

    Ok(tombstones)
}

fn parse_generation(name: &str) -> Option<u64> {
    name.strip_prefix(SNAPSHOT_PREFIX)?.parse().ok()
}

fn map_file(path: &Path) -> StorageResult<Mmap> {
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            StorageError::Corrupt(format!("missing file {:?}", path))
        } else {
            StorageError::Io(e)
        }
    })?;
    // Snapshot files are immutable once committed.
    let map = unsafe { Mmap::map(&file)? };
    Ok(map)
}

fn write_synced(path: &Path, data: &[u8]) -> StorageResult<()> {
    let mut file = File::create(path)?;
    file.write_all(data)?;
    file.sync_all()?;
    Ok(())
}

fn sync_dir(path: &Path) -> StorageResult<()> {
    #[cfg(unix)]
    {
        File::open(path)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Run `op`, retrying transient failures with exponential backoff.
pub(crate) fn with_retries<T>(
    retries: u32,
    backoff: Duration,
    mut op: impl FnMut(u32) -> StorageResult<T>,
) -> StorageResult<T> {
    let mut attempt = 0u32;
    loop {
        match op(attempt) {
            Err(e) if e.is_transient() && attempt < retries => {
                let delay = backoff.saturating_mul(1u32 << attempt.min(16));
                tracing::warn!(attempt, error = %e, delay_ms = delay.as_millis() as u64, "transient I/O failure");
                std::thread::sleep(delay);
                attempt += 1;
            }
            other => return other,
        }
    }
}
