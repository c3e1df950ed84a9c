//! Worker pool driver.
//!
//! Flow:
//! 1. Publish the initial gate
//! 2. Launch workers in order, each bound to the gate active at its launch
//! 3. At a trigger index: settle, swap in a new gate, dispose the old one once drained
//! 4. Wait for every worker, then dispose the final gate

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::Serialize;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{ConfigError, DriverError, GateError, Result};
use crate::gate::{ActiveGate, Gate, GateSummary, Replaced};
use crate::worker::{SleepTask, TaskBody, Worker, WorkerOutcome, WorkerState};

/// Result of a finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub total_workers: u64,
    pub launched: u64,
    pub completed: u64,
    pub cancelled: u64,
    pub gates: Vec<GateSummary>,
    pub workers: Vec<WorkerOutcome>,
}

impl RunReport {
    pub fn all_completed(&self) -> bool {
        self.completed == self.total_workers
    }

    pub fn worker(&self, id: u64) -> Option<&WorkerOutcome> {
        self.workers.iter().find(|w| w.id == id)
    }
}

/// Launches workers against a resizable gate and waits for all of them.
pub struct PoolDriver {
    config: Config,
    task: Arc<dyn TaskBody>,
}

impl PoolDriver {
    pub fn new(config: Config, task: Arc<dyn TaskBody>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, task })
    }

    /// Driver whose workers sleep for `config.task_duration`.
    pub fn with_sleep_task(config: Config) -> Result<Self, ConfigError> {
        let task = Arc::new(SleepTask::new(config.task_duration));
        Self::new(config, task)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn run(&self) -> Result<RunReport> {
        self.run_with_cancel(CancellationToken::new()).await
    }

    /// Like [`PoolDriver::run`], but stops launching once `cancel` fires and
    /// lets workers still waiting for a slot give up.
    pub async fn run_with_cancel(&self, cancel: CancellationToken) -> Result<RunReport> {
        let total = self.config.total_workers;
        let active = ActiveGate::new(self.config.initial_capacity);
        let mut gates = vec![active.current()];
        let mut plan = self.config.resize_plan.iter().peekable();
        let mut workers = JoinSet::new();
        let mut drains = Vec::new();
        let mut launched: u64 = 0;

        tracing::info!(
            workers = total,
            capacity = self.config.initial_capacity,
            resizes = self.config.resize_plan.len(),
            "Starting worker pool"
        );

        for id in 1..=total {
            if cancel.is_cancelled() {
                tracing::warn!(next_worker = id, "Run cancelled - not launching remaining workers");
                break;
            }

            if let Some(event) = plan.next_if(|e| e.index == id) {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::warn!(next_worker = id, "Run cancelled during settle delay");
                        break;
                    }
                    _ = tokio::time::sleep(self.config.settle_delay) => {}
                }

                let Replaced { retired, active: next } = active.replace(event.capacity);
                tracing::info!(
                    worker = id,
                    old_capacity = retired.capacity(),
                    new_capacity = next.capacity(),
                    generation = next.generation(),
                    "Max concurrency changed"
                );
                gates.push(next);
                drains.push(tokio::spawn(dispose_when_drained(retired)));
            }

            // Bind here, not inside the task, so the gate cannot drain before
            // the worker has registered on it.
            let worker = Worker::new(id, &active.current());
            let task = Arc::clone(&self.task);
            let cancel = cancel.clone();
            workers.spawn(async move {
                AssertUnwindSafe(worker.run(task.as_ref(), &cancel))
                    .catch_unwind()
                    .await
                    .map_err(|payload| (id, panic_message(payload)))
            });
            launched += 1;
        }

        let mut outcomes = Vec::with_capacity(launched as usize);
        let mut failure: Option<DriverError> = None;
        while let Some(joined) = workers.join_next().await {
            match joined? {
                Ok(Ok(outcome)) => outcomes.push(outcome),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Worker hit a gate invariant violation");
                    failure.get_or_insert(e.into());
                }
                Err((worker, message)) => {
                    tracing::error!(worker, %message, "Worker panicked");
                    failure.get_or_insert(DriverError::WorkerPanicked { worker, message });
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        for drained in futures::future::join_all(drains).await {
            drained??;
        }

        let last = active.current();
        last.wait_drained().await;
        last.dispose()?;

        outcomes.sort_by_key(|w| w.id);
        let completed = count_in(&outcomes, WorkerState::Completed);
        let cancelled = count_in(&outcomes, WorkerState::Cancelled);

        if completed == total {
            tracing::info!(workers = total, "All workers have completed");
        } else {
            tracing::warn!(workers = total, completed, cancelled, "Run finished with unfinished workers");
        }

        Ok(RunReport {
            total_workers: total,
            launched,
            completed,
            cancelled,
            gates: gates.iter().map(|g| g.summary()).collect(),
            workers: outcomes,
        })
    }
}

async fn dispose_when_drained(gate: Arc<Gate>) -> Result<(), GateError> {
    gate.wait_drained().await;
    tracing::info!(generation = gate.generation(), "Retired gate drained");
    gate.dispose()
}

fn count_in(outcomes: &[WorkerOutcome], state: WorkerState) -> u64 {
    outcomes.iter().filter(|w| w.state() == state).count() as u64
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
