//! Admission gate for bounded concurrency.
//!
//! A [`Gate`] has a fixed capacity for its whole lifetime. Changing the
//! concurrency limit means publishing a new gate through [`ActiveGate`];
//! workers already bound to the old gate keep using it until it drains.
//!
//! Holding a slot is represented by a [`SlotPermit`], and a worker's
//! registration on a gate by a [`GateBinding`]. A gate is drained once it has
//! neither, at which point it may be disposed.

mod active;
mod pool;

pub use active::{ActiveGate, Replaced};
pub use pool::{Gate, GateBinding, GateSummary, SlotPermit};
