use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, SchedulerError};

/// Scheduler-wide configuration. Channel-level settings (workers, timeout)
/// fall back to the defaults here when a submission carries no hints.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// File path for the job event log (opened append, created if absent).
    pub processing_log_path: PathBuf,

    /// Worker-pool size for channels whose first job carries no hint.
    pub default_workers: usize,

    /// Per-job deadline for channels whose first job carries no hint.
    pub default_timeout: Duration,

    /// Reserved upper bound on queued jobs per channel. Validated for
    /// positivity; admission is governed by `channel_buffer_size`.
    pub max_queue_size: usize,

    /// Root directory for relative subprocess working directories.
    pub work_dir: PathBuf,

    /// Per-stream byte cap on captured child output. 0 means unlimited.
    pub max_output_size: u64,

    /// Grace period for draining in-flight jobs during shutdown.
    pub shutdown_timeout: Duration,

    /// Capacity of each channel's bounded job queue.
    pub channel_buffer_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            processing_log_path: PathBuf::from("processing.log"),
            default_workers: 2,
            default_timeout: Duration::from_secs(5 * 60),
            max_queue_size: 10_000,
            work_dir: PathBuf::from("/tmp/joblane"),
            max_output_size: 1024 * 1024,
            shutdown_timeout: Duration::from_secs(30),
            channel_buffer_size: 1000,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.processing_log_path.as_os_str().is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "processing log path cannot be empty".into(),
            ));
        }
        if self.default_workers < 1 {
            return Err(SchedulerError::InvalidConfig(
                "default workers must be at least 1".into(),
            ));
        }
        if self.default_timeout < Duration::from_secs(1) {
            return Err(SchedulerError::InvalidConfig(
                "default timeout must be at least 1 second".into(),
            ));
        }
        if self.max_queue_size < 1 {
            return Err(SchedulerError::InvalidConfig(
                "max queue size must be at least 1".into(),
            ));
        }
        if self.work_dir.as_os_str().is_empty() {
            return Err(SchedulerError::InvalidConfig(
                "work directory cannot be empty".into(),
            ));
        }
        if self.shutdown_timeout < Duration::from_secs(1) {
            return Err(SchedulerError::InvalidConfig(
                "shutdown timeout must be at least 1 second".into(),
            ));
        }
        if self.channel_buffer_size < 1 {
            return Err(SchedulerError::InvalidConfig(
                "channel buffer size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
