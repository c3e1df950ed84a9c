use thiserror::Error;

/// Gate invariant violations and lifecycle errors.
///
/// `InvalidRelease` and `PrematureDispose` mean the acquire/release pairing
/// has been broken. They are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("release on gate {generation} without a held slot")]
    InvalidRelease { generation: u64 },

    #[error("dispose of gate {generation} with {held} slot(s) still held")]
    PrematureDispose { generation: u64, held: usize },

    #[error("gate {generation} is closed")]
    Closed { generation: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    #[error("resize trigger {index} is outside 1..={workers}")]
    TriggerOutOfRange { index: u64, workers: u64 },

    #[error("resize trigger {index} must come after trigger {previous}")]
    UnorderedTriggers { previous: u64, index: u64 },

    #[error("invalid resize event '{0}' (expected INDEX:CAPACITY, e.g. 6:1)")]
    InvalidResizeEvent(String),
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("worker {worker} panicked: {message}")]
    WorkerPanicked { worker: u64, message: String },

    #[error("worker task failed to join: {0}")]
    Join(#[from] tokio::task::JoinError),
}

pub type Result<T, E = DriverError> = std::result::Result<T, E>;
