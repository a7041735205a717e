use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

/// Lifecycle state of a scheduler's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockState {
    /// Created, never started.
    Idle,
    /// Clock active, ticks are dispatched.
    Running,
    /// Clock halted; tasks and counters retained, resumable with `start`.
    Paused,
    /// Clock thread released for good.
    Closed,
}

impl std::fmt::Display for ClockState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClockState::Idle => "idle",
            ClockState::Running => "running",
            ClockState::Paused => "paused",
            ClockState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

/// Point-in-time view of a scheduler, handed to hooks and returned by
/// [`Scheduler::stats`](crate::Scheduler::stats).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SchedulerStats {
    /// Ticks fully processed since the clock was first started.
    pub ticks: u64,
    /// Interval given to the most recent `start`.
    pub interval: Duration,
    /// `interval × ticks`.
    pub elapsed: Duration,
    /// Wall time spent inside task batches.
    pub busy: Duration,
    /// `busy / elapsed`, 0 before the first tick. Exceeds 1.0 under overrun.
    pub load: f64,
    /// Registered entries across all periods.
    pub task_count: usize,
    /// Ticks dropped because a dispatch outlasted the interval.
    pub skipped_ticks: u64,
}

/// Callback observing scheduler state around each tick's batch.
pub type Hook = Arc<dyn Fn(&SchedulerStats) + Send + Sync>;
