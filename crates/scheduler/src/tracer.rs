//! Execution-time statistics for a single task.
//!
//! [`TaskTracer`] wraps any [`Task`] and is itself a task, so it can be
//! registered in place of the task it observes while the caller keeps a
//! handle to read the numbers.

use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::scheduler::task::{Task, TaskError};

#[derive(Debug, Clone, Copy)]
struct TraceStats {
    count: u64,
    /// Cumulative duration in nanoseconds.
    total: u128,
    /// Cumulative squared duration in nanoseconds².
    total_sq: u128,
    /// `u128::MAX` until the first run.
    min: u128,
    max: u128,
}

impl Default for TraceStats {
    fn default() -> Self {
        Self {
            count: 0,
            total: 0,
            total_sq: 0,
            min: u128::MAX,
            max: 0,
        }
    }
}

impl TraceStats {
    fn record(&mut self, elapsed: Duration) {
        let nanos = elapsed.as_nanos();
        self.count += 1;
        self.total += nanos;
        self.total_sq = self.total_sq.saturating_add(nanos.saturating_mul(nanos));
        self.min = self.min.min(nanos);
        self.max = self.max.max(nanos);
    }

    fn mean(&self) -> Duration {
        if self.count == 0 {
            return Duration::ZERO;
        }
        nanos_to_duration(self.total / u128::from(self.count))
    }

    fn std_dev(&self) -> Duration {
        if self.count <= 1 {
            return Duration::ZERO;
        }
        let n = self.count as f64;
        let mean = self.total as f64 / n;
        let variance = (self.total_sq as f64 / n - mean * mean).max(0.0);
        Duration::from_nanos(variance.sqrt() as u64)
    }

    fn min(&self) -> Option<Duration> {
        (self.count > 0).then(|| nanos_to_duration(self.min))
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Summary of a tracer's statistics, read under one lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TraceSnapshot {
    pub count: u64,
    pub total: Duration,
    pub mean: Duration,
    pub min: Option<Duration>,
    pub max: Duration,
    pub std_dev: Duration,
}

/// A [`Task`] decorator recording how long each run of the wrapped task takes.
///
/// The wrapped task's result is returned unchanged, so a failing task is
/// still removed by the scheduler. Accessors may be called from any thread
/// while the task runs; the run itself is timed outside the stats lock.
pub struct TaskTracer<T> {
    task: T,
    stats: RwLock<TraceStats>,
}

/// Wrap `task` in a [`TaskTracer`].
pub fn trace<T: Task>(task: T) -> TaskTracer<T> {
    TaskTracer::new(task)
}

impl<T: Task> TaskTracer<T> {
    pub fn new(task: T) -> Self {
        Self {
            task,
            stats: RwLock::new(TraceStats::default()),
        }
    }
}

impl<T> TaskTracer<T> {
    /// The wrapped task.
    pub fn inner(&self) -> &T {
        &self.task
    }

    /// Number of completed runs.
    pub fn count(&self) -> u64 {
        self.read().count
    }

    pub fn cumulative_duration(&self) -> Duration {
        nanos_to_duration(self.read().total)
    }

    /// Mean run duration, zero before the first run.
    pub fn average_duration(&self) -> Duration {
        self.read().mean()
    }

    /// Shortest run, `None` before the first run.
    pub fn min_duration(&self) -> Option<Duration> {
        self.read().min()
    }

    /// Longest run, zero before the first run.
    pub fn max_duration(&self) -> Duration {
        nanos_to_duration(self.read().max)
    }

    /// Population standard deviation of run durations, zero with fewer than two runs.
    pub fn standard_deviation_duration(&self) -> Duration {
        self.read().std_dev()
    }

    pub fn snapshot(&self) -> TraceSnapshot {
        let stats = *self.read();
        TraceSnapshot {
            count: stats.count,
            total: nanos_to_duration(stats.total),
            mean: stats.mean(),
            min: stats.min(),
            max: nanos_to_duration(stats.max),
            std_dev: stats.std_dev(),
        }
    }

    /// Zero all counters; the next recorded run becomes the new minimum.
    pub fn reset(&self) {
        *self.stats.write().unwrap_or_else(PoisonError::into_inner) = TraceStats::default();
    }

    fn record(&self, elapsed: Duration) {
        self.stats
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .record(elapsed);
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, TraceStats> {
        self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Task> Task for TaskTracer<T> {
    fn run(&self) -> Result<(), TaskError> {
        let start = Instant::now();
        let result = self.task.run();
        self.record(start.elapsed());
        result
    }

    fn name(&self) -> &str {
        self.task.name()
    }
}

impl<T> std::fmt::Debug for TaskTracer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskTracer")
            .field("stats", &*self.read())
            .finish_non_exhaustive()
    }
}
