//! On-disk segment store with an in-memory id index.
//!
//! The drain loop is the only writer; playlist requests read through
//! `latest_segments`. One mutex guards the index and the id high-water mark
//! together, so readers never see one without the other. A second mutex
//! serializes whole appends, which keeps id assignment in call order and
//! leaves `last_id` untouched when an append fails.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};

use super::name::{Segment, SegmentId, SegmentName};
use super::retention::plan_eviction;
use crate::capture::Subscriber;
use crate::shared::errors::StoreError;
use crate::shared::paths::ensure_dir;

struct IndexState {
    index: HashMap<SegmentId, Segment>,
    last_id: SegmentId,
}

pub struct SegmentStore {
    dir: PathBuf,
    /// Upper bound for the indexed bytes; zero disables retention.
    max_size: u64,
    state: Mutex<IndexState>,
    append_lock: Mutex<()>,
}

/// Scans `dir` and indexes every entry that parses as a segment name.
///
/// Malformed names are skipped and do not move the returned high-water mark.
pub fn load_segments(dir: &Path) -> Result<(HashMap<SegmentId, Segment>, SegmentId), StoreError> {
    let mut index = HashMap::new();
    let mut last_id: SegmentId = 0;

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };

        let metadata = match entry.metadata() {
            Ok(metadata) if metadata.is_file() => metadata,
            _ => continue,
        };

        match Segment::from_file_name(name, metadata.len()) {
            Ok(segment) => {
                last_id = last_id.max(segment.id);
                index.insert(segment.id, segment);
            }
            Err(e) => {
                tracing::debug!(target: "segments", "Skipping {}: {}", name, e);
            }
        }
    }

    Ok((index, last_id))
}

impl SegmentStore {
    /// Opens the store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        ensure_dir(&dir)?;

        let (index, last_id) = load_segments(&dir)?;
        tracing::info!(
            target: "segments",
            dir = %dir.display(),
            segments = index.len(),
            last_id,
            "Segment store loaded"
        );

        Ok(Self {
            dir,
            max_size: 0,
            state: Mutex::new(IndexState { index, last_id }),
            append_lock: Mutex::new(()),
        })
    }

    /// Enables retention: after each publish the oldest segments are removed
    /// until the indexed total is at most `max_size` bytes.
    pub fn with_max_size(mut self, max_size: u64) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn last_id(&self) -> SegmentId {
        self.lock_state().last_id
    }

    pub fn len(&self) -> usize {
        self.lock_state().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn total_size(&self) -> u64 {
        self.lock_state().index.values().map(|s| s.size).sum()
    }

    fn lock_state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the segments with ids in `[last_id - count + 1, last_id]`,
    /// ascending, skipping ids that are not indexed.
    pub fn latest_segments(&self, count: usize) -> Vec<Segment> {
        let state = self.lock_state();
        if count == 0 || state.last_id == 0 {
            return Vec::new();
        }

        let first = state.last_id.saturating_sub(count as u64 - 1).max(1);
        (first..=state.last_id)
            .filter_map(|id| state.index.get(&id).cloned())
            .collect()
    }

    /// Copies `source` into the store as the next segment.
    pub fn add_segment(
        &self,
        source: &Path,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) -> Result<Segment, StoreError> {
        let file = File::open(source)?;
        let expected = file.metadata()?.len();
        self.add_segment_from_reader(file, expected, created_at, modified_at)
    }

    /// Appends a segment whose content is read from `reader`.
    ///
    /// Fails with [`StoreError::Integrity`] when fewer or more than `expected`
    /// bytes arrive; the partial file is removed and the index is unchanged.
    pub fn add_segment_from_reader<R: Read>(
        &self,
        mut reader: R,
        expected: u64,
        created_at: DateTime<Utc>,
        modified_at: DateTime<Utc>,
    ) -> Result<Segment, StoreError> {
        let _append = self.append_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let started = Instant::now();

        let duration = (modified_at - created_at).to_std().unwrap_or_default();
        let id = self.last_id() + 1;
        let segment_name = SegmentName::new(created_at, duration, id).file_name();
        let segment_path = self.dir.join(&segment_name);

        let copied = match copy_to_file(&mut reader, &segment_path) {
            Ok(copied) => copied,
            Err(e) => {
                discard_partial(&segment_path);
                return Err(e.into());
            }
        };

        if copied != expected {
            discard_partial(&segment_path);
            return Err(StoreError::Integrity { expected, copied });
        }

        let segment = Segment {
            id,
            name: segment_name,
            created_at,
            duration,
            size: copied,
        };

        {
            let mut state = self.lock_state();
            state.last_id = id;
            state.index.insert(id, segment.clone());
        }

        tracing::info!(
            target: "segments",
            id,
            bytes = copied,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Added segment"
        );

        Ok(segment)
    }

    /// Evicts the oldest segments until the indexed total fits in `max_bytes`.
    /// Returns the evicted ids.
    pub fn enforce_max_size(&self, max_bytes: u64) -> Vec<SegmentId> {
        let _append = self.append_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let evicted: Vec<Segment> = {
            let mut state = self.lock_state();
            let mut sizes: Vec<(SegmentId, u64)> =
                state.index.values().map(|s| (s.id, s.size)).collect();
            sizes.sort_unstable_by_key(|(id, _)| *id);

            plan_eviction(&sizes, max_bytes)
                .into_iter()
                .filter_map(|id| state.index.remove(&id))
                .collect()
        };

        for segment in &evicted {
            let path = self.dir.join(&segment.name);
            if let Err(e) = fs::remove_file(&path) {
                tracing::warn!(target: "segments", "Failed to delete evicted segment {:?}: {}", path, e);
            }
        }

        if !evicted.is_empty() {
            tracing::info!(target: "segments", count = evicted.len(), "Evicted old segments");
        }

        evicted.into_iter().map(|s| s.id).collect()
    }

    /// Resolves a requested file name to its path, only for indexed segments.
    pub fn segment_path(&self, name: &str) -> Option<PathBuf> {
        let parsed = SegmentName::parse(name).ok()?;
        let state = self.lock_state();
        let segment = state.index.get(&parsed.id)?;
        (segment.name == name).then(|| self.dir.join(&segment.name))
    }
}

impl Subscriber for SegmentStore {
    fn video_recorded(&self, path: &Path, created_at: DateTime<Utc>, modified_at: DateTime<Utc>) {
        if let Err(e) = self.add_segment(path, created_at, modified_at) {
            tracing::error!(target: "segments", "Error when adding segment: {}", e);
            return;
        }

        if self.max_size > 0 {
            self.enforce_max_size(self.max_size);
        }
    }
}

fn copy_to_file<R: Read>(reader: &mut R, path: &Path) -> io::Result<u64> {
    let mut out = File::create(path)?;
    io::copy(reader, &mut out)
}

fn discard_partial(path: &Path) {
    if path.exists() {
        if let Err(e) = fs::remove_file(path) {
            tracing::warn!(target: "segments", "Failed to delete partial segment {:?}: {}", path, e);
        }
    }
}
