//! slotgate: worker pool with a resizable admission gate.
//!
//! Concurrency is bounded by a [`gate::Gate`] whose capacity never changes.
//! Resizing publishes a new gate; workers keep the gate they were launched
//! with, so a shrink cannot strand a worker that is already waiting.

pub mod config;
pub mod driver;
pub mod error;
pub mod gate;
pub mod telemetry;
pub mod worker;

pub use config::{Config, ResizeEvent};
pub use driver::{PoolDriver, RunReport};
pub use error::{ConfigError, DriverError, GateError};
pub use gate::{ActiveGate, Gate, SlotPermit};
pub use worker::{InstantTask, SleepTask, TaskBody, TaskContext, WorkerOutcome, WorkerState};
