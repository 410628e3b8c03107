//! Job registry.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cutmedia_models::{Job, JobId, TransitionError};

/// Storage for live job state.
///
/// One mutable slot per job ID. The launcher is the only writer of terminal
/// state; HTTP handlers read snapshots.
pub trait JobStore: Send + Sync {
    /// Insert or overwrite a job.
    fn put(&self, job: Job);

    /// Insert a job only if its ID is not taken yet. Returns `false` and
    /// leaves the existing entry alone otherwise.
    fn insert_if_absent(&self, job: Job) -> bool;

    /// Snapshot of a job. `None` means the ID is unknown.
    fn get(&self, id: &JobId) -> Option<Job>;

    /// Apply a state change under the store's lock and return the new
    /// snapshot. `None` if the ID is unknown.
    fn update(
        &self,
        id: &JobId,
        f: &mut dyn FnMut(&mut Job) -> Result<(), TransitionError>,
    ) -> Option<Result<Job, TransitionError>>;

    /// All jobs, newest first.
    fn list(&self) -> Vec<Job>;

    /// Remove a job.
    fn remove(&self, id: &JobId) -> Option<Job>;
}

/// Process-local job store.
#[derive(Debug, Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave a half-written job: every
    // write replaces or mutates a single entry in place.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<JobId, Job>> {
        self.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<JobId, Job>> {
        self.jobs.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl JobStore for InMemoryJobStore {
    fn put(&self, job: Job) {
        self.write().insert(job.id.clone(), job);
    }

    fn insert_if_absent(&self, job: Job) -> bool {
        match self.write().entry(job.id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(job);
                true
            }
        }
    }

    fn get(&self, id: &JobId) -> Option<Job> {
        self.read().get(id).cloned()
    }

    fn update(
        &self,
        id: &JobId,
        f: &mut dyn FnMut(&mut Job) -> Result<(), TransitionError>,
    ) -> Option<Result<Job, TransitionError>> {
        let mut jobs = self.write();
        let job = jobs.get_mut(id)?;

        // Apply to a copy so a rejected transition leaves the slot untouched.
        let mut next = job.clone();
        Some(f(&mut next).map(|()| {
            *job = next;
            job.clone()
        }))
    }

    fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.read().values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    fn remove(&self, id: &JobId) -> Option<Job> {
        self.write().remove(id)
    }
}
