use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::error::SchedulerError;
use crate::scheduler::types::ClockState;

use super::Scheduler;
use super::clock::ClockHandle;
use super::core::{lock, read, write};

impl Scheduler {
    /// Start ticking every `interval`, or resume/re-time a paused or running clock.
    ///
    /// The first start spawns the clock thread and zeroes the tick and load
    /// counters; later calls keep tasks and counters and only change the
    /// interval.
    ///
    /// # Panics
    ///
    /// If the scheduler is closed, `interval` is zero, or the call comes
    /// from inside a task or hook of this scheduler. See [`try_start`](Self::try_start).
    pub fn start(&self, interval: Duration) {
        if let Err(e) = self.try_start(interval) {
            panic!("scheduler start failed: {e}");
        }
    }

    /// Pause the clock, waiting for any in-flight tick to finish.
    ///
    /// No task runs after this returns until the next `start`. Stopping a
    /// paused scheduler does nothing.
    ///
    /// # Panics
    ///
    /// If the scheduler was never started or is closed. See [`try_stop`](Self::try_stop).
    pub fn stop(&self) {
        if let Err(e) = self.try_stop() {
            panic!("scheduler stop failed: {e}");
        }
    }

    /// Shut the clock thread down for good, waiting for any in-flight tick.
    ///
    /// Registered tasks are kept; use [`duplicate`](Self::duplicate) to run
    /// them on a fresh scheduler.
    ///
    /// # Panics
    ///
    /// If the scheduler was never started or is already closed. See [`try_close`](Self::try_close).
    pub fn close(&self) {
        if let Err(e) = self.try_close() {
            panic!("scheduler close failed: {e}");
        }
    }

    pub fn try_start(&self, interval: Duration) -> Result<(), SchedulerError> {
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval(interval));
        }
        self.reject_reentrant()?;

        let mut clock = lock(&self.lifecycle);
        let state = *read(&self.state);
        match state {
            ClockState::Closed => return Err(SchedulerError::Closed),
            ClockState::Idle => {
                write(&self.shared.load).reset(interval);
                let handle = ClockHandle::spawn(Arc::clone(&self.shared), &self.config.thread_name)?;
                let _ = self.clock_thread.set(handle.thread_id());
                handle.run(interval)?;
                *clock = Some(handle);
            }
            ClockState::Paused | ClockState::Running => {
                let handle = clock.as_ref().ok_or(SchedulerError::ClockLost)?;
                write(&self.shared.load).retime(interval);
                handle.run(interval)?;
            }
        }

        *write(&self.state) = ClockState::Running;
        info!(
            interval_ms = interval.as_millis() as u64,
            from = %state,
            tasks = self.task_count(),
            "scheduler started"
        );
        Ok(())
    }

    pub fn try_stop(&self) -> Result<(), SchedulerError> {
        self.reject_reentrant()?;

        let clock = lock(&self.lifecycle);
        let state = *read(&self.state);
        match state {
            ClockState::Idle => Err(SchedulerError::NotStarted),
            ClockState::Closed => Err(SchedulerError::Closed),
            ClockState::Paused => Ok(()),
            ClockState::Running => {
                clock.as_ref().ok_or(SchedulerError::ClockLost)?.pause()?;
                *write(&self.state) = ClockState::Paused;
                info!(ticks = self.ticks(), "scheduler stopped");
                Ok(())
            }
        }
    }

    pub fn try_close(&self) -> Result<(), SchedulerError> {
        self.reject_reentrant()?;

        let mut clock = lock(&self.lifecycle);
        let state = *read(&self.state);
        match state {
            ClockState::Idle => Err(SchedulerError::NotStarted),
            ClockState::Closed => Err(SchedulerError::Closed),
            ClockState::Paused | ClockState::Running => {
                *write(&self.state) = ClockState::Closed;
                if let Some(handle) = clock.take() {
                    handle.release()?;
                }
                let stats = self.stats();
                info!(
                    ticks = stats.ticks,
                    load = stats.load,
                    skipped = stats.skipped_ticks,
                    "scheduler closed"
                );
                Ok(())
            }
        }
    }

    /// Lifecycle calls wait for the in-flight tick, which cannot finish while
    /// one of its own tasks or hooks is blocked on that wait.
    fn reject_reentrant(&self) -> Result<(), SchedulerError> {
        if self.clock_thread.get() == Some(&thread::current().id()) || self.shared.in_dispatch() {
            return Err(SchedulerError::ReentrantLifecycle);
        }
        Ok(())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        let clock = self
            .lifecycle
            .get_mut()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        if let Some(handle) = clock {
            if let Err(e) = handle.release() {
                warn!(error = %e, "clock thread did not shut down cleanly");
            }
        }
    }
}
