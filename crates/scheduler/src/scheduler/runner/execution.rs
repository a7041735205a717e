use std::panic::{self, AssertUnwindSafe};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::Instant;

use tracing::{debug, warn};

use crate::scheduler::registry::{DispatchReport, panic_message};
use crate::scheduler::types::Hook;

use super::Scheduler;
use super::core::{Shared, lock, read, write};

/// Marks the current thread as the dispatcher until dropped.
struct Dispatching<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> Dispatching<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock(slot) = Some(thread::current().id());
        Self(slot)
    }
}

impl Drop for Dispatching<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

impl Shared {
    /// Process one tick: before hook, due-task batch, counters, after hook.
    ///
    /// The whole tick runs under `pass`, so ticks never overlap. The registry
    /// is only locked to snapshot the batch and to retire failed entries, so
    /// tasks and hooks may edit it; those edits apply from the next tick.
    pub(super) fn process_tick(&self) -> DispatchReport {
        if self.in_dispatch() {
            warn!("tick requested from inside a tick, ignoring");
            return DispatchReport::default();
        }
        let _pass = lock(&self.pass);
        let _dispatching = Dispatching::enter(&self.dispatcher);

        let (before, after) = {
            let hooks = read(&self.hooks);
            (hooks.before.clone(), hooks.after.clone())
        };

        if let Some(hook) = before {
            self.run_hook("before", &hook);
        }

        let tick = read(&self.load).ticks;
        let started = Instant::now();
        let batch = read(&self.registry).due(tick);
        let outcome = batch.run();
        if !outcome.failed.is_empty() {
            self.edit_registry(|registry| registry.retire(&outcome.failed));
        }
        let busy = started.elapsed();
        write(&self.load).record_tick(busy);

        let report = outcome.report;
        debug!(
            tick,
            ran = report.ran,
            failed = report.failed,
            busy_us = busy.as_micros() as u64,
            "tick processed"
        );

        if let Some(hook) = after {
            self.run_hook("after", &hook);
        }

        report
    }

    /// Hooks see a snapshot of the stats; a panicking hook is logged and contained.
    fn run_hook(&self, which: &'static str, hook: &Hook) {
        let stats = self.stats();
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(&stats))) {
            warn!(hook = which, error = %panic_message(&*payload), "scheduler hook panicked");
        }
    }

    pub(super) fn record_skipped(&self, skipped: u64) {
        write(&self.load).record_skipped(skipped);
        warn!(skipped, "tick overrun, skipping ticks");
    }
}

impl Scheduler {
    /// Process one tick on the calling thread.
    ///
    /// Allowed in every state, including after `close`, and counted toward
    /// [`ticks`](Self::ticks) and the load. A manual tick and a clock tick
    /// never overlap: each waits for the other to finish, hooks included.
    /// Called from inside one of this scheduler's own tasks or hooks, it does
    /// nothing and returns an empty report.
    ///
    /// Useful for driving the scheduler from an external tick source.
    pub fn tick(&self) -> DispatchReport {
        self.shared.process_tick()
    }
}
