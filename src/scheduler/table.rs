use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use crate::error::{Result, SchedulerError};
use crate::scheduler::job::{Job, JobStatus};

/// In-memory record of every job the scheduler has seen this run.
///
/// Submission inserts a pending record, the owning channel processor
/// advances it through running into exactly one terminal state, and
/// inspection reads clones out. History lives until pruned or the process
/// exits; nothing is persisted.
#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a submitted job. An ID colliding with a live record is
    /// rejected; finished records are replaced.
    pub fn insert(&self, job: Job) -> Result<()> {
        let mut jobs = self.lock();
        if let Some(existing) = jobs.get(&job.id) {
            if !existing.status.is_terminal() {
                return Err(SchedulerError::InvalidJob(format!(
                    "job {} is already active",
                    job.id
                )));
            }
        }
        jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Drop a record that never made it into a queue.
    pub fn remove(&self, id: &str) {
        self.lock().remove(id);
    }

    pub fn mark_running(&self, id: &str, at: DateTime<Utc>) {
        if let Some(job) = self.lock().get_mut(id) {
            job.status = JobStatus::Running;
            job.start_time = Some(at);
        }
    }

    pub fn mark_finished(
        &self,
        id: &str,
        status: JobStatus,
        error: Option<String>,
        at: DateTime<Utc>,
    ) {
        if let Some(job) = self.lock().get_mut(id) {
            job.status = status;
            job.error = error;
            job.end_time = Some(at);
        }
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().get(id).cloned()
    }

    /// List records, optionally filtered, sorted chronologically by
    /// submission time.
    pub fn list(&self, channel: Option<&str>, status: Option<JobStatus>) -> Vec<Job> {
        let jobs = self.lock();
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| channel.is_none_or(|c| j.channel == c))
            .filter(|j| status.is_none_or(|s| j.status == s))
            .cloned()
            .collect();
        out.sort_by_key(|j| j.start_time);
        out
    }

    /// Remove terminal records. Returns the number removed.
    pub fn prune_finished(&self) -> usize {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|_, job| !job.status.is_terminal());
        before - jobs.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Job>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
