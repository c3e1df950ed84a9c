//! Worker lifecycle and the pluggable task body.
//!
//! Each worker moves through `Created -> WaitingForSlot -> Running -> Completed`.
//! The only other edge is `WaitingForSlot -> Cancelled`, taken when the run is
//! cancelled before the worker got a slot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::GateError;
use crate::gate::{Gate, GateBinding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Created,
    WaitingForSlot,
    Running,
    Completed,
    Cancelled,
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }

    pub fn can_advance_to(&self, next: WorkerState) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::WaitingForSlot)
                | (Self::WaitingForSlot, Self::Running)
                | (Self::WaitingForSlot, Self::Cancelled)
                | (Self::Running, Self::Completed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::WaitingForSlot => "waiting_for_slot",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// What a task body knows about the slot it is running in.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub worker: u64,
    pub generation: u64,
    pub capacity: usize,
    /// The gate the slot was taken from. The worker releases its slot after
    /// the body returns; the body must not release it itself.
    pub gate: Arc<Gate>,
}

/// Work performed while a worker holds a slot.
///
/// Must finish on its own; the slot is only released once `execute` returns.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn execute(&self, ctx: &TaskContext);
}

/// Stand-in for real work: sleeps for a fixed duration.
#[derive(Debug, Clone, Copy)]
pub struct SleepTask {
    duration: Duration,
}

impl SleepTask {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl TaskBody for SleepTask {
    async fn execute(&self, _ctx: &TaskContext) {
        tokio::time::sleep(self.duration).await;
    }
}

/// Resolves after a single yield. For exercising the gate without wall-clock delays.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstantTask;

#[async_trait]
impl TaskBody for InstantTask {
    async fn execute(&self, _ctx: &TaskContext) {
        tokio::task::yield_now().await;
    }
}

/// Final record of one worker, returned to the driver on completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerOutcome {
    pub id: u64,
    pub generation: u64,
    pub trace: Vec<WorkerState>,
}

impl WorkerOutcome {
    pub fn state(&self) -> WorkerState {
        self.trace.last().copied().unwrap_or(WorkerState::Created)
    }
}

/// A worker bound to the gate that was active when it was launched.
pub struct Worker {
    id: u64,
    binding: GateBinding,
    state: WorkerState,
    trace: Vec<WorkerState>,
}

impl Worker {
    pub fn new(id: u64, gate: &Arc<Gate>) -> Self {
        Self {
            id,
            binding: gate.bind(),
            state: WorkerState::Created,
            trace: vec![WorkerState::Created],
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    fn advance(&mut self, next: WorkerState) {
        if !self.state.can_advance_to(next) {
            debug_assert!(false, "illegal worker transition {:?} -> {:?}", self.state, next);
            tracing::error!(
                worker = self.id,
                from = self.state.as_str(),
                to = next.as_str(),
                "Bug: illegal worker state transition"
            );
            return;
        }
        self.state = next;
        self.trace.push(next);
    }

    /// Acquire a slot on the bound gate, run `task`, release the same slot.
    ///
    /// `cancel` is only observed while waiting for a slot.
    pub async fn run(
        mut self,
        task: &dyn TaskBody,
        cancel: &CancellationToken,
    ) -> Result<WorkerOutcome, GateError> {
        let gate = Arc::clone(self.binding.gate());
        let generation = gate.generation();

        self.advance(WorkerState::WaitingForSlot);
        tracing::info!(worker = self.id, generation, "Waiting to acquire slot");

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                self.advance(WorkerState::Cancelled);
                tracing::info!(worker = self.id, generation, "Cancelled while waiting for slot");
                return Ok(self.finish());
            }
            permit = gate.acquire() => permit?,
        };

        self.advance(WorkerState::Running);
        tracing::info!(worker = self.id, generation, held = gate.held(), "Slot acquired, running");

        let ctx = TaskContext {
            worker: self.id,
            generation,
            capacity: gate.capacity(),
            gate: Arc::clone(&gate),
        };
        task.execute(&ctx).await;

        permit.release()?;
        self.advance(WorkerState::Completed);
        tracing::info!(worker = self.id, generation, "Slot released");

        Ok(self.finish())
    }

    fn finish(self) -> WorkerOutcome {
        WorkerOutcome {
            id: self.id,
            generation: self.binding.gate().generation(),
            trace: self.trace,
        }
    }
}
