use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use joblane::scheduler::{ApplicationSpec, Job, Scheduler};
use joblane::SchedulerConfig;

#[derive(Parser, Debug)]
#[command(name = "joblane")]
#[command(about = "In-process job scheduler dispatching work across isolated channels")]
struct Args {
    /// Path to the job event log
    #[arg(long, default_value = "processing.log")]
    log: PathBuf,

    /// Default number of workers per channel
    #[arg(long, default_value = "2")]
    workers: usize,

    /// Default job timeout in seconds
    #[arg(long, default_value = "300")]
    timeout: u64,

    /// Working directory for job execution
    #[arg(long, default_value = "/tmp/joblane")]
    work_dir: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = SchedulerConfig {
        processing_log_path: args.log,
        default_workers: args.workers,
        default_timeout: Duration::from_secs(args.timeout),
        work_dir: args.work_dir,
        ..SchedulerConfig::default()
    };

    tracing::info!(
        workers = config.default_workers,
        timeout = ?config.default_timeout,
        work_dir = %config.work_dir.display(),
        "Starting joblane"
    );

    let scheduler = Scheduler::new(config)?;

    submit_example_jobs(&scheduler).await;

    // Print statistics until interrupted.
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received interrupt, shutting down");
                break;
            }
            _ = ticker.tick() => {
                for (channel, stats) in scheduler.channel_stats().await {
                    tracing::info!(
                        channel = %channel,
                        total = stats.total_jobs,
                        failed = stats.failed_jobs,
                        active = stats.active_jobs.len(),
                        "Channel statistics"
                    );
                }
            }
        }
    }

    scheduler.shutdown().await?;
    Ok(())
}

/// A handful of jobs demonstrating the three dispatch shapes: plain
/// external process, stdin passthrough and payload-only.
async fn submit_example_jobs(scheduler: &Scheduler) {
    let echo = Job::new("example-echo-1", "scripts")
        .with_workers(2)
        .with_timeout(Duration::from_secs(60))
        .with_application(ApplicationSpec {
            name: "echo".into(),
            path: "/bin/echo".into(),
            args: vec!["Hello, World!".into()],
            ..Default::default()
        });
    if let Err(e) = scheduler.submit(echo).await {
        tracing::error!(error = %e, "Failed to submit echo job");
    }

    let body = serde_json::json!({
        "input_file": "data.csv",
        "output_format": "json",
        "compression": true,
    });
    let report = Job::new("example-report-1", "data-processing")
        .with_workers(3)
        .with_timeout(Duration::from_secs(300))
        .with_body(body.to_string())
        .with_application(ApplicationSpec {
            name: "cat".into(),
            path: "/bin/cat".into(),
            env: [("PROCESSING_MODE".to_string(), "fast".to_string())].into(),
            pass_payload: true,
            ..Default::default()
        });
    if let Err(e) = scheduler.submit(report).await {
        tracing::error!(error = %e, "Failed to submit report job");
    }

    let notification = serde_json::json!({
        "type": "email",
        "recipient": "user@example.com",
        "template": "welcome",
    });
    let notify = Job::new("example-notify-1", "notifications")
        .with_body(notification.to_string());
    if let Err(e) = scheduler.submit(notify).await {
        tracing::error!(error = %e, "Failed to submit notification job");
    }
}
