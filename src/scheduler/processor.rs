use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::process_log::ProcessLog;
use crate::scheduler::job::{ApplicationSpec, Job, JobStatus};
use crate::scheduler::table::JobTable;
use crate::supervisor::{ExecConfig, ProcessSupervisor};

/// How long the payload-only path holds a worker slot. Stands in for
/// pluggable payload handlers so regular jobs exercise the full lifecycle.
const PAYLOAD_PROCESSING_DELAY: Duration = Duration::from_millis(100);

/// Mutable per-channel statistics. `total_jobs`/`last_job_time` are bumped
/// by the scheduler on admission, `failed_jobs` by the processor on terminal
/// failure.
#[derive(Debug, Default)]
pub(crate) struct ChannelCounters {
    pub total_jobs: u64,
    pub failed_jobs: u64,
    pub last_job_time: Option<DateTime<Utc>>,
}

/// Wiring handed to a processor at channel creation.
pub(crate) struct ProcessorConfig {
    pub name: String,
    pub workers: usize,
    pub timeout: Duration,
    pub max_output_size: u64,
    pub supervisor: Arc<ProcessSupervisor>,
    pub process_log: Arc<ProcessLog>,
    pub table: Arc<JobTable>,
    pub counters: Arc<Mutex<ChannelCounters>>,
    pub tracker: TaskTracker,
}

enum WorkOutcome {
    Finished(Option<String>),
    DeadlineElapsed,
}

/// Drives one channel: dequeues jobs in FIFO order, gates them on the
/// worker-slot semaphore and runs each through its lifecycle.
pub(crate) struct ChannelProcessor {
    config: ProcessorConfig,
    slots: Arc<Semaphore>,
    active: Mutex<HashMap<String, CancellationToken>>,
}

impl ChannelProcessor {
    pub fn new(config: ProcessorConfig) -> Self {
        let slots = Arc::new(Semaphore::new(config.workers));
        Self {
            config,
            slots,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Dispatcher loop. Returns when the shutdown token fires or the queue
    /// sender side is gone.
    pub async fn run(self: Arc<Self>, mut jobs: mpsc::Receiver<Job>, shutdown: CancellationToken) {
        tracing::info!(
            channel = %self.config.name,
            workers = self.config.workers,
            "Starting channel processor"
        );

        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(channel = %self.config.name, "Stopping channel processor");
                    return;
                }
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => return,
                },
            };

            // One permit per in-flight job; blocks here when the pool is
            // saturated, which is what keeps dispatch FIFO.
            let permit = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(channel = %self.config.name, "Stopping channel processor");
                    return;
                }
                permit = self.slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let processor = self.clone();
            let job_shutdown = shutdown.clone();
            self.config.tracker.spawn(async move {
                let _permit = permit;
                processor.process_job(job_shutdown, job).await;
            });
        }
    }

    /// Full lifecycle of one dequeued job, from running to a terminal
    /// state, with event-log lines on both edges.
    async fn process_job(&self, shutdown: CancellationToken, job: Job) {
        let job_token = shutdown.child_token();
        self.active_jobs_lock()
            .insert(job.id.clone(), job_token.clone());

        self.config.table.mark_running(&job.id, Utc::now());
        self.config
            .process_log
            .log_event(&self.config.name, &job.id, "STARTED");

        let work = async {
            match &job.application {
                Some(application) => self.run_application(&job_token, &job, application).await,
                None => self.run_payload_only(&job_token).await,
            }
        };
        tokio::pin!(work);

        let outcome = tokio::select! {
            error = &mut work => WorkOutcome::Finished(error),
            _ = tokio::time::sleep(self.config.timeout) => WorkOutcome::DeadlineElapsed,
        };

        let (status, error) = match outcome {
            WorkOutcome::Finished(None) => (JobStatus::Complete, None),
            WorkOutcome::Finished(Some(message)) => {
                if job_token.is_cancelled() {
                    (JobStatus::Cancelled, Some("job cancelled".to_string()))
                } else {
                    (JobStatus::Failed, Some(message))
                }
            }
            WorkOutcome::DeadlineElapsed => {
                // Cancel the job scope and let the termination protocol run
                // to completion before reporting.
                job_token.cancel();
                let _ = work.await;
                (
                    JobStatus::TimedOut,
                    Some(format!("job timed out after {:?}", self.config.timeout)),
                )
            }
        };

        if matches!(status, JobStatus::Failed | JobStatus::TimedOut) {
            self.counters_lock().failed_jobs += 1;
        }

        self.config
            .table
            .mark_finished(&job.id, status, error, Utc::now());
        self.config.process_log.log_event(
            &self.config.name,
            &job.id,
            &format!("COMPLETED - Status: {}", status),
        );

        self.active_jobs_lock().remove(&job.id);
    }

    /// Hand the job's application to the supervisor. Returns the execution
    /// error message, if any.
    async fn run_application(
        &self,
        token: &CancellationToken,
        job: &Job,
        application: &ApplicationSpec,
    ) -> Option<String> {
        let mut cfg = ExecConfig::new(application.path.clone());
        cfg.args = application.args.clone();
        cfg.env = application.env.clone();
        cfg.working_dir = application.working_dir.clone();
        cfg.output_limit = self.config.max_output_size;
        if application.pass_payload {
            cfg.stdin = Some(job.body.clone());
        }

        let result = self.config.supervisor.execute(token, cfg).await;
        tracing::debug!(
            channel = %self.config.name,
            job_id = %job.id,
            execution_id = %result.execution_id,
            exit_code = result.exit_code,
            "Application finished"
        );
        result.error
    }

    /// Payload-only jobs have no handler in this engine; hold the slot
    /// briefly so they travel the same state machine as application jobs.
    async fn run_payload_only(&self, token: &CancellationToken) -> Option<String> {
        tokio::select! {
            _ = tokio::time::sleep(PAYLOAD_PROCESSING_DELAY) => None,
            _ = token.cancelled() => Some("job cancelled".to_string()),
        }
    }

    /// IDs of jobs currently inside their lifecycle, in no particular order.
    pub fn active_jobs(&self) -> Vec<String> {
        self.active_jobs_lock().keys().cloned().collect()
    }

    /// Cancel a live job by ID. Returns false if the job is not active on
    /// this channel.
    pub fn cancel(&self, job_id: &str) -> bool {
        match self.active_jobs_lock().get(job_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn active_jobs_lock(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        match self.active.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn counters_lock(&self) -> MutexGuard<'_, ChannelCounters> {
        match self.config.counters.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
