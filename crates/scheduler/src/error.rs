use std::time::Duration;

use thiserror::Error;

/// Lifecycle violations and clock failures.
///
/// `start`, `stop` and `close` treat every variant as fatal and panic;
/// the `try_` variants return it instead.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is closed")]
    Closed,

    #[error("scheduler was never started")]
    NotStarted,

    #[error("tick interval must be non-zero, got {0:?}")]
    InvalidInterval(Duration),

    #[error("lifecycle call from the scheduler's own clock thread would deadlock")]
    ReentrantLifecycle,

    #[error("clock setup error: {0}")]
    Clock(#[from] std::io::Error),

    #[error("clock thread exited unexpectedly")]
    ClockLost,
}

/// Errors loading or validating a [`SchedulerConfig`](crate::SchedulerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config error: {0}")]
    Invalid(String),
}
