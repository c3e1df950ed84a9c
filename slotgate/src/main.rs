use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use slotgate::{Config, PoolDriver, ResizeEvent, RunReport, telemetry};

/// Exit status for invalid configuration, a gate invariant violation or a
/// worker panic.
const EXIT_FATAL: u8 = 1;
/// Exit status when the run was cancelled before every worker completed.
const EXIT_CANCELLED: u8 = 3;

/// Simulate a worker pool whose concurrency limit changes mid-run
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Total number of workers to launch
    #[arg(short, long, default_value_t = 10)]
    workers: u64,

    /// Initial number of workers allowed to run at once
    #[arg(short, long, default_value_t = 2)]
    capacity: usize,

    /// Resize event: swap to CAPACITY slots before launching worker INDEX (repeatable)
    #[arg(long = "resize", value_name = "INDEX:CAPACITY", default_value = "6:1")]
    resize: Vec<ResizeEvent>,

    /// Run without any resize events
    #[arg(long, conflicts_with = "resize")]
    no_resize: bool,

    /// How long each task holds its slot (e.g. 5s, 250ms, 1m 30s)
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    task_duration: Duration,

    /// Pause before each resize
    #[arg(long, value_parser = humantime::parse_duration, default_value = "5s")]
    settle_delay: Duration,

    /// Cancel workers still waiting for a slot after this long
    #[arg(long, value_parser = humantime::parse_duration)]
    timeout: Option<Duration>,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    report: bool,
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            total_workers: self.workers,
            initial_capacity: self.capacity,
            resize_plan: if self.no_resize {
                Vec::new()
            } else {
                self.resize.clone()
            },
            settle_delay: self.settle_delay,
            task_duration: self.task_duration,
        }
    }
}

/// Cancel on ctrl-c, or once `timeout` elapses.
fn spawn_canceller(cancel: CancellationToken, timeout: Option<Duration>) {
    tokio::spawn(async move {
        let reason = match timeout {
            Some(timeout) => tokio::select! {
                _ = tokio::signal::ctrl_c() => "interrupted",
                _ = tokio::time::sleep(timeout) => "timeout elapsed",
            },
            None => {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                "interrupted"
            }
        };
        tracing::warn!(reason, "Cancelling waiting workers");
        cancel.cancel();
    });
}

async fn run(cli: &Cli) -> anyhow::Result<RunReport> {
    let driver = PoolDriver::with_sleep_task(cli.config()).context("invalid configuration")?;

    let cancel = CancellationToken::new();
    spawn_canceller(cancel.clone(), cli.timeout);

    let report = driver
        .run_with_cancel(cancel)
        .await
        .context("worker pool aborted")?;

    if cli.report {
        let json = serde_json::to_string_pretty(&report).context("failed to serialize report")?;
        println!("{json}");
    }
    Ok(report)
}

/// Log the outcome of a run and map it to the process exit status.
fn exit_status(outcome: &anyhow::Result<RunReport>) -> u8 {
    match outcome {
        Ok(report) if report.all_completed() => 0,
        Ok(report) => {
            tracing::warn!(
                completed = report.completed,
                cancelled = report.cancelled,
                "Run cancelled before all workers completed"
            );
            EXIT_CANCELLED
        }
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "Fatal");
            EXIT_FATAL
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    telemetry::init_tracing();
    let cli = Cli::parse();

    let outcome = run(&cli).await;
    ExitCode::from(exit_status(&outcome))
}
