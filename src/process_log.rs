use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;

/// Append-only, line-oriented event log for job starts and completions.
///
/// One UTF-8 line per event:
/// `YYYY-MM-DD HH:MM:SS.mmm - <EVENT> - Channel: <name>, JobID: <id>`
///
/// Writes are serialized by an internal mutex so concurrent processors
/// always emit whole lines.
#[derive(Debug)]
pub struct ProcessLog {
    file: Mutex<File>,
}

impl ProcessLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Record a job event. Log-write failures are reported through tracing
    /// rather than failing the job.
    pub fn log_event(&self, channel: &str, job_id: &str, event: &str) {
        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let line = format!(
            "{} - {} - Channel: {}, JobID: {}\n",
            timestamp, event, channel, job_id
        );

        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!(channel, job_id, error = %e, "Failed to write process log entry");
        }
    }

    /// Flush buffered writes to disk. Called once during shutdown.
    pub fn sync(&self) -> std::io::Result<()> {
        let file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        file.sync_all()
    }
}
