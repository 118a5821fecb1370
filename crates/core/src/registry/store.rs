//! The job map shared by the orchestrator, sweeper and API.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, info};

use super::{read_snapshot, write_snapshot, RegistryError};
use crate::job::{Job, JobState};

/// Single source of truth for job records.
///
/// All access goes through short critical sections; no lock is held across
/// an await point.
#[derive(Debug)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
    snapshot_path: PathBuf,
}

impl JobRegistry {
    /// Create an empty registry persisting to `snapshot_path`.
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            snapshot_path: snapshot_path.into(),
        }
    }

    /// Create a registry seeded from the snapshot at `snapshot_path`.
    ///
    /// An unreadable or corrupt snapshot is logged and the registry starts
    /// empty.
    pub fn load(snapshot_path: impl Into<PathBuf>) -> Self {
        let registry = Self::new(snapshot_path);
        match read_snapshot(&registry.snapshot_path) {
            Ok(jobs) => {
                info!(
                    path = %registry.snapshot_path.display(),
                    count = jobs.len(),
                    "Loaded job snapshot"
                );
                *registry.write() = jobs;
            }
            Err(e) => {
                error!(
                    path = %registry.snapshot_path.display(),
                    error = %e,
                    "Failed to load job snapshot, starting empty"
                );
            }
        }
        registry
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Job>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Insert a new job. Ids must be unique.
    pub fn insert(&self, job: Job) -> Result<(), RegistryError> {
        let mut jobs = self.write();
        if jobs.contains_key(&job.id) {
            return Err(RegistryError::DuplicateId(job.id));
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.read().contains_key(id)
    }

    /// Copy of every job, keyed by id.
    pub fn list(&self) -> HashMap<String, Job> {
        self.read().clone()
    }

    /// Jobs matching a predicate.
    pub fn filter(&self, pred: impl Fn(&Job) -> bool) -> Vec<Job> {
        self.read().values().filter(|j| pred(j)).cloned().collect()
    }

    /// Atomic read-modify-write of one job.
    ///
    /// Returns `None` without doing anything when the job no longer exists,
    /// so late writers never resurrect a deleted job.
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut Job) -> R) -> Option<R> {
        self.write().get_mut(id).map(f)
    }

    pub fn remove(&self, id: &str) -> Option<Job> {
        self.write().remove(id)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Number of jobs per state.
    pub fn count_by_state(&self) -> HashMap<JobState, usize> {
        let mut counts: HashMap<JobState, usize> =
            JobState::all().into_iter().map(|s| (s, 0)).collect();
        for job in self.read().values() {
            *counts.entry(job.state).or_default() += 1;
        }
        counts
    }

    /// Write the whole registry to the snapshot file.
    pub fn save_snapshot(&self) -> Result<(), RegistryError> {
        let jobs = self.list();
        write_snapshot(&self.snapshot_path, &jobs)?;
        debug!(count = jobs.len(), "Job snapshot written");
        Ok(())
    }
}
