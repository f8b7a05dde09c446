use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use log::warn;
use crate::job::{JobKey, JobRecord, JobStatus, ProgressReport};

/// Process-wide map from job key to its current record.
///
/// Each job's background task is the only writer of its own record; pollers
/// read concurrently. Every mutation runs to completion under the write lock,
/// so a reader never sees a half-applied update.
#[derive(Debug, Clone, Default)]
pub struct ProgressStore {
    inner: Arc<RwLock<HashMap<JobKey, JobRecord>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobKey, JobRecord>> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobKey, JobRecord>> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a fresh record and return the target path it now owns.
    ///
    /// None if the key is already taken. A target path already claimed by
    /// another job is made unique with the key prefix.
    pub fn insert(&self, mut record: JobRecord) -> Option<PathBuf> {
        let mut map = self.write();
        if map.contains_key(&record.key) {
            return None;
        }
        if map.values().any(|r| r.target_path == record.target_path) {
            record.target_path = disambiguate(&record.target_path, &record.key);
        }
        let target = record.target_path.clone();
        map.insert(record.key.clone(), record);
        Some(target)
    }

    /// Apply `f` to the record for `key` atomically.
    ///
    /// The edit is discarded if it would move `status` along an illegal
    /// transition or lower progress without a status change into
    /// `escalating`. Returns whether the edit was committed.
    pub fn update<F>(&self, key: &JobKey, f: F) -> bool
    where
        F: FnOnce(&mut JobRecord),
    {
        let mut map = self.write();
        let Some(current) = map.get_mut(key) else {
            warn!("Job {}: update for unknown key ignored", key);
            return false;
        };

        let mut next = current.clone();
        f(&mut next);

        if !current.status.can_transition_to(next.status) {
            warn!("Job {}: rejected status transition {} -> {}", key, current.status, next.status);
            return false;
        }

        let entering_attempt = next.status == JobStatus::Escalating && current.status != JobStatus::Escalating;
        if next.progress_percent < current.progress_percent && !entering_attempt {
            // Late heartbeat after a newer update: keep the higher value
            next.progress_percent = current.progress_percent;
        }

        *current = next;
        true
    }

    pub fn get(&self, key: &JobKey) -> Option<JobRecord> {
        self.read().get(key).cloned()
    }

    /// Poll-side view; unknown keys yield the `not_found` sentinel
    pub fn report(&self, key: &JobKey) -> ProgressReport {
        match self.read().get(key) {
            Some(record) => ProgressReport::from(record),
            None => ProgressReport::not_found(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

/// `dir/name_converted.mp4` -> `dir/name_converted_<key8>.mp4`
fn disambiguate(target: &Path, key: &JobKey) -> PathBuf {
    let prefix: String = key.as_str().chars().filter(|c| *c != '-').take(8).collect();
    let stem = target.file_stem().and_then(|s| s.to_str()).unwrap_or("output");
    let name = match target.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, prefix, ext),
        None => format!("{}_{}", stem, prefix),
    };
    target.with_file_name(name)
}
