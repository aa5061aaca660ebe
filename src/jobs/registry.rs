use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{JobError, Result};
use crate::jobs::record::{JobRecord, JobSummary};

/// Tracks every open job by id.
///
/// The service wraps the registry in a single `RwLock`; every method here runs
/// in microseconds so the lock is never held across workload calls or
/// teardown.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: HashMap<String, Arc<JobRecord>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new job. Fails if a live job already uses the id; the
    /// existing record is left untouched.
    pub fn create(&mut self, record: JobRecord) -> Result<Arc<JobRecord>> {
        match self.jobs.entry(record.id().to_string()) {
            Entry::Occupied(entry) => Err(JobError::AlreadyExists(entry.key().clone())),
            Entry::Vacant(entry) => Ok(entry.insert(Arc::new(record)).clone()),
        }
    }

    pub fn find(&self, id: &str) -> Result<Arc<JobRecord>> {
        self.jobs.get(id).cloned().ok_or_else(|| {
            tracing::debug!(job_id = id, open_jobs = self.jobs.len(), "Job lookup failed");
            JobError::NotFound(id.to_string())
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.jobs.contains_key(id)
    }

    /// Renew the lease of a job to `lease_secs` from now.
    pub fn touch(&self, id: &str, lease_secs: f64) -> Result<()> {
        self.find(id)?.touch(lease_secs);
        Ok(())
    }

    /// Seconds until the lease runs out, negative if already expired.
    pub fn remaining(&self, id: &str) -> Result<f64> {
        Ok(self.find(id)?.remaining_secs())
    }

    /// Snapshot of every job, sorted by id
    pub fn list_all(&self) -> Vec<JobSummary> {
        let mut jobs: Vec<JobSummary> = self.jobs.values().map(|j| j.summary()).collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Ids of jobs whose lease has run out
    pub fn expired_ids(&self) -> Vec<String> {
        self.jobs
            .values()
            .filter(|j| j.is_expired())
            .map(|j| j.id().to_string())
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// Detach a job so its teardown can run after the lock is released.
    pub fn remove_if_present(&mut self, id: &str) -> Option<Arc<JobRecord>> {
        self.jobs.remove(id)
    }

    /// Detach `record` only if it is still the job registered under its id.
    /// A later job reusing the id is left alone.
    pub fn remove_record(&mut self, record: &Arc<JobRecord>) -> bool {
        match self.jobs.entry(record.id().to_string()) {
            Entry::Occupied(entry) if Arc::ptr_eq(entry.get(), record) => {
                entry.remove();
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
