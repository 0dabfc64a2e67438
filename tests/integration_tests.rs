use std::path::Path;
use std::time::Duration;

use joblane::config::SchedulerConfig;
use joblane::error::SchedulerError;
use joblane::scheduler::{ApplicationSpec, Job, JobStatus, Scheduler};

fn test_config(dir: &Path) -> SchedulerConfig {
    SchedulerConfig {
        processing_log_path: dir.join("processing.log"),
        default_workers: 2,
        default_timeout: Duration::from_secs(5),
        max_queue_size: 100,
        work_dir: dir.to_path_buf(),
        max_output_size: 1024,
        shutdown_timeout: Duration::from_secs(5),
        channel_buffer_size: 10,
    }
}

fn app(path: &str, args: &[&str]) -> ApplicationSpec {
    ApplicationSpec {
        path: path.into(),
        args: args.iter().map(|a| a.to_string()).collect(),
        ..Default::default()
    }
}

/// Poll until the job reaches `status` or the deadline passes.
async fn wait_for_status(scheduler: &Scheduler, id: &str, status: JobStatus, timeout: Duration) -> Job {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Ok(job) = scheduler.job_status(id) {
            if job.status == status {
                return job;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "job {} did not reach {} within {:?}",
            id,
            status,
            timeout
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_payload_only_admission() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let job = Job::new("j1", "a").with_body(r#"{"x":1}"#);
    scheduler.submit(job).await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = scheduler.channel_stats().await;
    let a = stats.get("a").expect("channel a should exist");
    assert_eq!(a.total_jobs, 1);
    assert_eq!(a.failed_jobs, 0);
    assert!(a.active_jobs.is_empty());
    assert!(a.last_job_time.is_some());

    assert_eq!(
        scheduler.job_status("j1").unwrap().status,
        JobStatus::Complete
    );

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_external_process_success() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let job = Job::new("j2", "b")
        .with_workers(1)
        .with_timeout(Duration::from_secs(2))
        .with_application(app("echo", &["hi"]));
    scheduler.submit(job).await.unwrap();

    let job = wait_for_status(&scheduler, "j2", JobStatus::Complete, Duration::from_secs(2)).await;
    assert!(job.error.is_none());
    assert!(job.start_time.unwrap() <= job.end_time.unwrap());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_timeout_escalation() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let job = Job::new("j3", "c")
        .with_timeout(Duration::from_millis(100))
        .with_application(app("sleep", &["1"]));
    scheduler.submit(job).await.unwrap();

    let job = wait_for_status(&scheduler, "j3", JobStatus::TimedOut, Duration::from_secs(1)).await;
    assert!(job.error.unwrap().contains("timed out"));

    // The child was escalated out of the process registry.
    assert!(scheduler.list_executions().is_empty());

    let stats = scheduler.channel_stats().await;
    assert_eq!(stats.get("c").unwrap().failed_jobs, 1);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_queue_full_rejection() {
    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig {
        channel_buffer_size: 1,
        ..test_config(dir.path())
    };
    let scheduler = Scheduler::new(config).unwrap();

    let long_job = |id: &str| {
        Job::new(id, "full")
            .with_workers(1)
            .with_timeout(Duration::from_secs(5))
            .with_application(app("sleep", &["2"]))
    };

    // The dispatcher prefetches one job off the buffer while it waits for a
    // worker slot, so the queue only reads full with: one job running, one
    // held by the dispatcher and one sitting in the buffer.
    scheduler.submit(long_job("occupant")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.submit(long_job("held")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    scheduler.submit(long_job("queued")).await.unwrap();

    let err = scheduler.submit(long_job("rejected")).await.unwrap_err();
    assert!(matches!(err, SchedulerError::ChannelFull(_)));

    // The rejected job left no trace.
    let stats = scheduler.channel_stats().await;
    assert_eq!(stats.get("full").unwrap().total_jobs, 3);
    assert!(matches!(
        scheduler.job_status("rejected"),
        Err(SchedulerError::JobNotFound(_))
    ));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_validation_rejection_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let job = Job::new("", "d").with_body("{}");
    let err = scheduler.submit(job).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJob(_)));

    let stats = scheduler.channel_stats().await;
    assert!(!stats.contains_key("d"));
    assert!(scheduler.list_jobs(None, None).is_empty());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_bounded_output_job_still_completes() {
    let dir = tempfile::tempdir().unwrap();
    let config = SchedulerConfig {
        max_output_size: 10,
        ..test_config(dir.path())
    };
    let scheduler = Scheduler::new(config).unwrap();

    let job = Job::new("chatty", "output")
        .with_timeout(Duration::from_secs(5))
        .with_application(app("sh", &["-c", "seq 1 100000"]));
    scheduler.submit(job).await.unwrap();

    let job = wait_for_status(
        &scheduler,
        "chatty",
        JobStatus::Complete,
        Duration::from_secs(5),
    )
    .await;
    assert!(job.error.is_none());

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_job_accounting() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let job = Job::new("boom", "errors").with_application(app("sh", &["-c", "exit 1"]));
    scheduler.submit(job).await.unwrap();

    let job = wait_for_status(&scheduler, "boom", JobStatus::Failed, Duration::from_secs(2)).await;
    assert!(job.error.unwrap().contains("exited"));

    let stats = scheduler.channel_stats().await;
    let errors = stats.get("errors").unwrap();
    assert_eq!(errors.total_jobs, 1);
    assert_eq!(errors.failed_jobs, 1);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_running_job() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let job = Job::new("doomed", "cancel")
        .with_timeout(Duration::from_secs(30))
        .with_application(app("sleep", &["10"]));
    scheduler.submit(job).await.unwrap();

    wait_for_status(&scheduler, "doomed", JobStatus::Running, Duration::from_secs(2)).await;
    scheduler.cancel_job("doomed").await.unwrap();

    let job = wait_for_status(
        &scheduler,
        "doomed",
        JobStatus::Cancelled,
        Duration::from_secs(3),
    )
    .await;
    assert_eq!(job.error.as_deref(), Some("job cancelled"));

    // Cancellation is not a failure.
    let stats = scheduler.channel_stats().await;
    assert_eq!(stats.get("cancel").unwrap().failed_jobs, 0);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cancel_unknown_job() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let err = scheduler.cancel_job("nope").await.unwrap_err();
    assert!(matches!(err, SchedulerError::JobNotFound(_)));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_channel_settings_are_immutable() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    scheduler
        .submit(Job::new("first", "fixed").with_workers(1))
        .await
        .unwrap();
    // Later hints are ignored; the first submission fixed the pool size.
    scheduler
        .submit(Job::new("second", "fixed").with_workers(5))
        .await
        .unwrap();

    let stats = scheduler.channel_stats().await;
    assert_eq!(stats.get("fixed").unwrap().workers, 1);

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_duplicate_active_id_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let job = Job::new("dup", "dupes")
        .with_timeout(Duration::from_secs(10))
        .with_application(app("sleep", &["2"]));
    scheduler.submit(job.clone()).await.unwrap();

    let err = scheduler.submit(job).await.unwrap_err();
    assert!(matches!(err, SchedulerError::InvalidJob(_)));

    scheduler.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fifo_dispatch_within_channel() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("processing.log");
    let config = SchedulerConfig {
        processing_log_path: log_path.clone(),
        ..test_config(dir.path())
    };
    let scheduler = Scheduler::new(config).unwrap();

    for i in 0..5 {
        scheduler
            .submit(Job::new(format!("fifo-{}", i), "ordered").with_workers(1))
            .await
            .unwrap();
    }

    for i in 0..5 {
        wait_for_status(
            &scheduler,
            &format!("fifo-{}", i),
            JobStatus::Complete,
            Duration::from_secs(5),
        )
        .await;
    }
    scheduler.shutdown().await.unwrap();

    // STARTED lines appear in submission order on a single-worker channel.
    let log = std::fs::read_to_string(&log_path).unwrap();
    let started: Vec<&str> = log
        .lines()
        .filter(|l| l.contains("- STARTED -"))
        .collect();
    assert_eq!(started.len(), 5);
    for (i, line) in started.iter().enumerate() {
        assert!(
            line.ends_with(&format!("JobID: fifo-{}", i)),
            "out-of-order dispatch: {}",
            line
        );
    }
}

#[tokio::test]
async fn test_process_log_records_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("processing.log");
    let config = SchedulerConfig {
        processing_log_path: log_path.clone(),
        ..test_config(dir.path())
    };
    let scheduler = Scheduler::new(config).unwrap();

    scheduler
        .submit(Job::new("logged", "logch").with_application(app("echo", &["ok"])))
        .await
        .unwrap();
    wait_for_status(&scheduler, "logged", JobStatus::Complete, Duration::from_secs(2)).await;
    scheduler.shutdown().await.unwrap();

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log
        .lines()
        .any(|l| l.contains("STARTED - Channel: logch, JobID: logged")));
    assert!(log
        .lines()
        .any(|l| l.contains("COMPLETED - Status: complete - Channel: logch, JobID: logged")));
}

#[tokio::test]
async fn test_shutdown_is_idempotent_and_refuses_work() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    scheduler
        .submit(Job::new("parting", "shutdown-ch"))
        .await
        .unwrap();

    scheduler.shutdown().await.unwrap();
    scheduler.shutdown().await.unwrap();

    let err = scheduler
        .submit(Job::new("late", "shutdown-ch"))
        .await
        .unwrap_err();
    assert!(matches!(err, SchedulerError::ShuttingDown));
    assert!(scheduler.list_executions().is_empty());
}

#[tokio::test]
async fn test_shutdown_cancels_inflight_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    let job = Job::new("inflight", "draining")
        .with_timeout(Duration::from_secs(30))
        .with_application(app("sleep", &["10"]));
    scheduler.submit(job).await.unwrap();
    wait_for_status(&scheduler, "inflight", JobStatus::Running, Duration::from_secs(2)).await;

    let started = std::time::Instant::now();
    scheduler.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    // The drain cancelled the job rather than abandoning it.
    let job = scheduler.job_status("inflight").unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(scheduler.list_executions().is_empty());
}

#[tokio::test]
async fn test_worker_pool_bounds_concurrency() {
    let dir = tempfile::tempdir().unwrap();
    let scheduler = Scheduler::new(test_config(dir.path())).unwrap();

    for i in 0..4 {
        let job = Job::new(format!("slot-{}", i), "bounded")
            .with_workers(2)
            .with_timeout(Duration::from_secs(10))
            .with_application(app("sleep", &["1"]));
        scheduler.submit(job).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(300)).await;
    let stats = scheduler.channel_stats().await;
    let bounded = stats.get("bounded").unwrap();
    assert_eq!(bounded.workers, 2);
    assert!(
        bounded.active_jobs.len() <= 2,
        "active jobs exceed the worker pool: {:?}",
        bounded.active_jobs
    );
    assert!(
        scheduler
            .list_jobs(Some("bounded"), Some(JobStatus::Running))
            .len()
            <= 2
    );

    scheduler.shutdown().await.unwrap();
}
