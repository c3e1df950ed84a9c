//! Driver configuration.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::error::ConfigError;

/// Swap in a gate of `capacity` slots just before launching worker `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResizeEvent {
    pub index: u64,
    pub capacity: usize,
}

impl ResizeEvent {
    pub fn new(index: u64, capacity: usize) -> Self {
        Self { index, capacity }
    }
}

impl FromStr for ResizeEvent {
    type Err = ConfigError;

    /// Parses `INDEX:CAPACITY`, e.g. `6:1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidResizeEvent(s.to_string());
        let (index, capacity) = s.split_once(':').ok_or_else(invalid)?;
        let index = index.trim().parse().map_err(|_| invalid())?;
        let capacity = capacity.trim().parse().map_err(|_| invalid())?;
        Ok(Self { index, capacity })
    }
}

impl fmt::Display for ResizeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.capacity)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub total_workers: u64,
    pub initial_capacity: usize,
    /// Ordered by strictly increasing trigger index.
    pub resize_plan: Vec<ResizeEvent>,
    /// Pause before each resize. Pacing only; correctness does not depend on it.
    pub settle_delay: Duration,
    pub task_duration: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            total_workers: 10,
            initial_capacity: 2,
            resize_plan: vec![ResizeEvent::new(6, 1)],
            settle_delay: Duration::from_secs(5),
            task_duration: Duration::from_secs(5),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.total_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }

        let mut previous: Option<u64> = None;
        for event in &self.resize_plan {
            if event.index == 0 || event.index > self.total_workers {
                return Err(ConfigError::TriggerOutOfRange {
                    index: event.index,
                    workers: self.total_workers,
                });
            }
            if let Some(previous) = previous
                && event.index <= previous
            {
                return Err(ConfigError::UnorderedTriggers {
                    previous,
                    index: event.index,
                });
            }
            previous = Some(event.index);
        }
        Ok(())
    }
}
