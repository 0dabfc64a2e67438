use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SchedulerError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Complete,
    Failed,
    TimedOut,
    Cancelled,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::TimedOut | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Complete => write!(f, "complete"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::TimedOut => write!(f, "timed_out"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// External application attached to a job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplicationSpec {
    /// Informational label, not used for dispatch.
    #[serde(default)]
    pub name: String,

    /// Executable path. Required.
    pub path: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Environment overlay on top of the host environment.
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Relative paths resolve under the scheduler's work directory.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Feed the job body to the child's stdin.
    #[serde(default)]
    pub pass_payload: bool,
}

/// A unit of work bound for a named channel.
///
/// `workers` and `timeout` are advisory hints consulted only when the job is
/// the first submission for its channel; later hints are ignored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub channel: String,

    /// Worker-pool size hint. 0 falls back to the configured default.
    #[serde(default)]
    pub workers: usize,

    /// Per-job deadline hint. `None` falls back to the configured default.
    #[serde(default)]
    pub timeout: Option<Duration>,

    /// Opaque payload, conventionally JSON.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<u8>,

    #[serde(default)]
    pub application: Option<ApplicationSpec>,

    #[serde(default)]
    pub status: JobStatus,

    /// Non-empty exactly for failed, timed-out and cancelled jobs.
    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            channel: channel.into(),
            workers: 0,
            timeout: None,
            body: Vec::new(),
            application: None,
            status: JobStatus::Pending,
            error: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_application(mut self, application: ApplicationSpec) -> Self {
        self.application = Some(application);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Check the submission for well-formedness. Pure: neither the job nor
    /// any engine state is touched.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(SchedulerError::InvalidJob("job ID cannot be empty".into()));
        }
        if self.channel.is_empty() {
            return Err(SchedulerError::InvalidJob("channel cannot be empty".into()));
        }
        if let Some(application) = &self.application {
            if application.path.is_empty() {
                return Err(SchedulerError::InvalidJob(
                    "application path cannot be empty".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Point-in-time view of one channel, deep-copied out of the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    pub workers: usize,
    pub active_jobs: Vec<String>,
    pub total_jobs: u64,
    pub failed_jobs: u64,
    pub last_job_time: Option<DateTime<Utc>>,
}
