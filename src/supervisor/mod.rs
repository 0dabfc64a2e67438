//! External-process execution engine.
//!
//! This module owns everything that touches the operating system on behalf
//! of a job:
//! - **Spawning**: composes environment and working directory, wires stdin
//! - **Output capture**: drains stdout/stderr through byte-capped sinks
//! - **Termination**: SIGTERM first, SIGKILL after a grace window
//! - **Registry**: live executions are tracked so shutdown can reap them

pub mod limiter;

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use limiter::LimitedWriter;

/// Grace window between SIGTERM and SIGKILL when a config does not say
/// otherwise.
pub const DEFAULT_KILL_TIMEOUT: Duration = Duration::from_secs(5);

/// Everything needed to run one external application.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    pub path: String,
    pub args: Vec<String>,

    /// Relative paths are resolved under the supervisor's work directory;
    /// `None` inherits the host's current directory.
    pub working_dir: Option<PathBuf>,

    /// Overlay on top of the host environment. Identical names replace the
    /// host value.
    pub env: HashMap<String, String>,

    /// Bytes fed to the child's stdin. `None` attaches the null device.
    pub stdin: Option<Vec<u8>>,

    /// Per-stream capture cap in bytes. 0 means unlimited.
    pub output_limit: u64,

    /// Grace window between the cooperative signal and the forceful kill.
    pub kill_timeout: Duration,
}

impl ExecConfig {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
            working_dir: None,
            env: HashMap::new(),
            stdin: None,
            output_limit: 0,
            kill_timeout: DEFAULT_KILL_TIMEOUT,
        }
    }
}

/// Outcome of one execution. Captured output is always present, truncated to
/// the configured cap, even when the run failed.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub execution_id: Uuid,
    /// Exit status of the child; -1 for non-exit failures (spawn error,
    /// signal death, wait failure).
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// `Some` iff the execution failed.
    pub error: Option<String>,
}

enum WaitOutcome {
    Exited(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Spawns, observes and terminates external processes.
///
/// Owned by the scheduler; channel processors hold it by `Arc`.
#[derive(Debug)]
pub struct ProcessSupervisor {
    work_dir: PathBuf,
    processes: Mutex<HashMap<Uuid, u32>>,
}

impl ProcessSupervisor {
    pub fn new(work_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        Ok(Self {
            work_dir: work_dir.to_path_buf(),
            processes: Mutex::new(HashMap::new()),
        })
    }

    /// Run one application to completion or cancellation.
    ///
    /// Waits for the child to exit or for `token` to fire, whichever comes
    /// first. On cancellation the child gets SIGTERM, then
    /// `cfg.kill_timeout` to exit, then SIGKILL.
    pub async fn execute(&self, token: &CancellationToken, cfg: ExecConfig) -> ExecutionResult {
        let execution_id = Uuid::new_v4();
        let start_time = Utc::now();

        let mut command = Command::new(&cfg.path);
        command
            .args(&cfg.args)
            .envs(&cfg.env)
            .stdin(if cfg.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &cfg.working_dir {
            let dir = if dir.is_absolute() {
                dir.clone()
            } else {
                self.work_dir.join(dir)
            };
            command.current_dir(dir);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult {
                    execution_id,
                    exit_code: -1,
                    stdout: String::new(),
                    stderr: String::new(),
                    start_time,
                    end_time: Utc::now(),
                    error: Some(format!("failed to start process: {}", e)),
                };
            }
        };

        if let Some(pid) = child.id() {
            self.registry().insert(execution_id, pid);
        }

        // Feed the payload and close stdin so the child sees EOF. A child
        // that exits without reading closes the pipe early; that is its
        // business, not an execution failure.
        if let Some(body) = &cfg.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(body).await {
                    tracing::debug!(execution_id = %execution_id, error = %e, "Child stopped reading stdin");
                }
            }
        }

        // Drain both streams in their own tasks so a chatty child never
        // deadlocks against a full pipe while we block in wait().
        let stdout_task = tokio::spawn(drain_limited(child.stdout.take(), cfg.output_limit));
        let stderr_task = tokio::spawn(drain_limited(child.stderr.take(), cfg.output_limit));

        let outcome = tokio::select! {
            status = child.wait() => WaitOutcome::Exited(status),
            _ = token.cancelled() => WaitOutcome::Cancelled,
        };

        let (status, error) = match outcome {
            WaitOutcome::Exited(Ok(status)) => {
                let error = if status.success() {
                    None
                } else {
                    Some(format!("process exited with {}", status))
                };
                (Some(status), error)
            }
            WaitOutcome::Exited(Err(e)) => {
                (None, Some(format!("failed to wait on process: {}", e)))
            }
            WaitOutcome::Cancelled => self.terminate(&mut child, cfg.kill_timeout).await,
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        self.registry().remove(&execution_id);

        ExecutionResult {
            execution_id,
            exit_code: status.and_then(|s| s.code()).unwrap_or(-1),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            start_time,
            end_time: Utc::now(),
            error,
        }
    }

    /// Cooperative-then-forceful termination of a live child.
    async fn terminate(
        &self,
        child: &mut Child,
        kill_timeout: Duration,
    ) -> (Option<ExitStatus>, Option<String>) {
        let Some(pid) = child.id() else {
            // Already exited; just reap it.
            return match child.wait().await {
                Ok(status) => (Some(status), Some(format!("process terminated: {}", status))),
                Err(e) => (None, Some(format!("failed to wait on process: {}", e))),
            };
        };

        if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            tracing::debug!(pid, error = %e, "SIGTERM delivery failed, escalating");
            return self.force_kill(child).await;
        }

        let graceful = tokio::select! {
            status = child.wait() => Some(status),
            _ = tokio::time::sleep(kill_timeout) => None,
        };

        match graceful {
            Some(Ok(status)) => (Some(status), Some(format!("process terminated: {}", status))),
            Some(Err(e)) => (None, Some(format!("failed to wait on process: {}", e))),
            None => self.force_kill(child).await,
        }
    }

    async fn force_kill(&self, child: &mut Child) -> (Option<ExitStatus>, Option<String>) {
        if let Err(e) = child.kill().await {
            return (None, Some(format!("failed to kill process: {}", e)));
        }
        match child.wait().await {
            Ok(status) => (Some(status), Some(format!("process killed: {}", status))),
            Err(e) => (None, Some(format!("failed to wait on process: {}", e))),
        }
    }

    /// Snapshot of currently-live execution IDs.
    pub fn list(&self) -> Vec<Uuid> {
        self.registry().keys().copied().collect()
    }

    /// Forcefully terminate one live execution.
    pub fn kill(&self, execution_id: Uuid) -> Result<()> {
        let pid = self
            .registry()
            .get(&execution_id)
            .copied()
            .ok_or_else(|| SchedulerError::ProcessNotFound(execution_id.to_string()))?;

        signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL)
            .map_err(|e| SchedulerError::ProcessNotFound(format!("{}: {}", execution_id, e)))
    }

    /// Forcefully terminate every registered execution. Per-child failures
    /// are logged and skipped; the registry is cleared regardless.
    pub fn cleanup(&self) {
        let mut processes = self.registry();
        for (execution_id, pid) in processes.drain() {
            if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGKILL) {
                tracing::warn!(execution_id = %execution_id, pid, error = %e, "Failed to kill process during cleanup");
            }
        }
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<Uuid, u32>> {
        match self.processes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Read a child output stream to EOF, keeping at most `limit` bytes.
///
/// Reading continues past the cap so the child never blocks on a full pipe;
/// the surplus is discarded.
async fn drain_limited<R>(stream: Option<R>, limit: u64) -> Vec<u8>
where
    R: AsyncRead + Unpin + Send,
{
    let Some(mut stream) = stream else {
        return Vec::new();
    };

    let mut sink = LimitedWriter::new(limit);
    let mut chunk = [0u8; 8192];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) => break,
            // Short writes past the cap are expected; keep draining.
            Ok(n) => {
                let _ = sink.write(&chunk[..n]);
            }
            Err(_) => break,
        }
    }
    sink.into_inner()
}
