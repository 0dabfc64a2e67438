//! The scheduling engine: channel registry, admission and shutdown.
//!
//! A [`Scheduler`] owns every channel, the process supervisor, the job
//! table and the event log. Channels come into existence on the first
//! submission that names them and keep their worker count and timeout for
//! life; callers wanting different settings use a different channel name.

pub mod job;
mod processor;
pub mod table;

pub use job::{ApplicationSpec, ChannelStats, Job, JobStatus};
pub use table::JobTable;

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use crate::config::SchedulerConfig;
use crate::error::{Result, SchedulerError};
use crate::process_log::ProcessLog;
use crate::supervisor::ProcessSupervisor;
use processor::{ChannelCounters, ChannelProcessor, ProcessorConfig};

/// One registered channel: its queue sender, its processor and its
/// statistics. Workers and timeout are fixed at creation.
struct ChannelHandle {
    workers: usize,
    queue: mpsc::Sender<Job>,
    processor: Arc<ChannelProcessor>,
    counters: Arc<Mutex<ChannelCounters>>,
}

/// Top-level façade over the job-scheduling engine.
pub struct Scheduler {
    config: SchedulerConfig,
    supervisor: Arc<ProcessSupervisor>,
    process_log: Arc<ProcessLog>,
    table: Arc<JobTable>,
    channels: RwLock<HashMap<String, ChannelHandle>>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
    shutting_down: AtomicBool,
}

impl Scheduler {
    /// Validate the configuration and prepare the work directory, event log
    /// and supervisor. Nothing is spawned until the first submission.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;

        std::fs::create_dir_all(&config.work_dir)?;
        let process_log = Arc::new(ProcessLog::open(&config.processing_log_path)?);
        let supervisor = Arc::new(ProcessSupervisor::new(&config.work_dir)?);

        Ok(Self {
            config,
            supervisor,
            process_log,
            table: Arc::new(JobTable::new()),
            channels: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            tracker: TaskTracker::new(),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Submit a job for processing on its channel.
    ///
    /// Creates the channel on first use, sized by the job's hints (or the
    /// configured defaults). Admission is non-blocking: a full queue is
    /// reported as [`SchedulerError::ChannelFull`] and leaves no trace of
    /// the job.
    pub async fn submit(&self, mut job: Job) -> Result<()> {
        job.validate()?;

        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(SchedulerError::ShuttingDown);
        }

        let mut channels = self.channels.write().await;
        let handle = match channels.entry(job.channel.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let handle = self.create_channel(&job);
                entry.insert(handle)
            }
        };

        job.status = JobStatus::Pending;
        job.error = None;
        job.start_time = Some(Utc::now());
        job.end_time = None;

        let job_id = job.id.clone();
        let channel_name = job.channel.clone();
        self.table.insert(job.clone())?;

        match handle.queue.try_send(job) {
            Ok(()) => {
                let mut counters = lock_counters(&handle.counters);
                counters.total_jobs += 1;
                counters.last_job_time = Some(Utc::now());
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                self.table.remove(&job_id);
                Err(SchedulerError::ChannelFull(channel_name))
            }
            Err(TrySendError::Closed(_)) => {
                self.table.remove(&job_id);
                Err(SchedulerError::ShuttingDown)
            }
        }
    }

    /// Build a channel from the first job's hints and launch its processor
    /// under the shutdown scope. Caller holds the registry write lock.
    fn create_channel(&self, job: &Job) -> ChannelHandle {
        let workers = if job.workers > 0 {
            job.workers
        } else {
            self.config.default_workers
        };
        let timeout = job.timeout.unwrap_or(self.config.default_timeout);

        let (queue, jobs_rx) = mpsc::channel(self.config.channel_buffer_size);
        let counters = Arc::new(Mutex::new(ChannelCounters::default()));

        let processor = Arc::new(ChannelProcessor::new(ProcessorConfig {
            name: job.channel.clone(),
            workers,
            timeout,
            max_output_size: self.config.max_output_size,
            supervisor: self.supervisor.clone(),
            process_log: self.process_log.clone(),
            table: self.table.clone(),
            counters: counters.clone(),
            tracker: self.tracker.clone(),
        }));

        self.tracker
            .spawn(processor.clone().run(jobs_rx, self.shutdown.clone()));

        tracing::info!(
            channel = %job.channel,
            workers,
            timeout = ?timeout,
            "Created channel"
        );

        ChannelHandle {
            workers,
            queue,
            processor,
            counters,
        }
    }

    /// Deep copy of every channel's statistics.
    pub async fn channel_stats(&self) -> HashMap<String, ChannelStats> {
        let channels = self.channels.read().await;
        channels
            .iter()
            .map(|(name, handle)| {
                let counters = lock_counters(&handle.counters);
                (
                    name.clone(),
                    ChannelStats {
                        workers: handle.workers,
                        active_jobs: handle.processor.active_jobs(),
                        total_jobs: counters.total_jobs,
                        failed_jobs: counters.failed_jobs,
                        last_job_time: counters.last_job_time,
                    },
                )
            })
            .collect()
    }

    /// Current record of one job, whatever its state.
    pub fn job_status(&self, id: &str) -> Result<Job> {
        self.table
            .get(id)
            .ok_or_else(|| SchedulerError::JobNotFound(id.to_string()))
    }

    /// Job records, optionally filtered by channel and status.
    pub fn list_jobs(&self, channel: Option<&str>, status: Option<JobStatus>) -> Vec<Job> {
        self.table.list(channel, status)
    }

    /// Drop finished job records from the table. Returns the number removed.
    pub fn prune_finished(&self) -> usize {
        self.table.prune_finished()
    }

    /// Cancel a job that is currently inside its lifecycle. Jobs still in
    /// queue or already finished report [`SchedulerError::JobNotFound`].
    pub async fn cancel_job(&self, id: &str) -> Result<()> {
        let channels = self.channels.read().await;
        for handle in channels.values() {
            if handle.processor.cancel(id) {
                tracing::info!(job_id = id, "Job cancelled");
                return Ok(());
            }
        }
        Err(SchedulerError::JobNotFound(id.to_string()))
    }

    /// Live execution IDs in the supervisor's registry.
    pub fn list_executions(&self) -> Vec<Uuid> {
        self.supervisor.list()
    }

    /// Forcefully terminate one live execution.
    pub fn kill_execution(&self, execution_id: Uuid) -> Result<()> {
        self.supervisor.kill(execution_id)
    }

    /// Stop accepting work, drain in-flight jobs and reap leftover child
    /// processes. Idempotent: repeated calls return immediately.
    ///
    /// Jobs still unfinished when the grace period elapses keep their last
    /// written status; their children are force-killed.
    pub async fn shutdown(&self) -> Result<()> {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        tracing::info!("Starting graceful shutdown");
        self.shutdown.cancel();
        self.tracker.close();

        match tokio::time::timeout(self.config.shutdown_timeout, self.tracker.wait()).await {
            Ok(()) => tracing::info!("All channel processors drained"),
            Err(_) => {
                tracing::warn!("Shutdown timed out, some jobs may still be running");
            }
        }

        self.supervisor.cleanup();

        if let Err(e) = self.process_log.sync() {
            tracing::warn!(error = %e, "Failed to sync process log");
        }

        Ok(())
    }
}

fn lock_counters(counters: &Mutex<ChannelCounters>) -> MutexGuard<'_, ChannelCounters> {
    match counters.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
