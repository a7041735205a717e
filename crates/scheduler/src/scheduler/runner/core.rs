use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{
    Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::thread::{self, ThreadId};
use std::time::Duration;

use crate::config::SchedulerConfig;
use crate::scheduler::metrics::LoadAccumulator;
use crate::scheduler::registry::TaskRegistry;
use crate::scheduler::task::TaskRef;
use crate::scheduler::types::{ClockState, Hook, SchedulerStats};

use super::clock::ClockHandle;

/// The periodic task scheduler.
///
/// Tasks are registered with a period in ticks. Once started, a dedicated
/// clock thread fires one tick per interval and runs every due task
/// sequentially, spreading same-period tasks over distinct ticks. Every
/// method takes `&self`, so a scheduler can be shared behind an `Arc`.
pub struct Scheduler {
    pub(super) config: SchedulerConfig,
    /// State shared with the clock thread.
    pub(super) shared: Arc<Shared>,
    /// Serialises lifecycle calls; holds the clock handle while one is alive.
    pub(super) lifecycle: Mutex<Option<ClockHandle>>,
    /// Written only while `lifecycle` is held.
    pub(super) state: RwLock<ClockState>,
    /// Set once when the clock thread is spawned.
    pub(super) clock_thread: OnceLock<ThreadId>,
}

/// Registry, counters and hooks, shared between a scheduler and its clock thread.
pub(super) struct Shared {
    /// Locked only briefly; tasks run against a snapshot of their batch.
    pub(super) registry: RwLock<TaskRegistry>,
    /// Mirror of `registry.len()`, refreshed after every registry mutation.
    pub(super) task_count: AtomicUsize,
    pub(super) load: RwLock<LoadAccumulator>,
    pub(super) hooks: RwLock<Hooks>,
    /// Held for a whole tick, hooks included, so ticks never overlap.
    pub(super) pass: Mutex<()>,
    /// Thread currently processing a tick.
    pub(super) dispatcher: Mutex<Option<ThreadId>>,
}

#[derive(Default)]
pub(super) struct Hooks {
    pub(super) before: Option<Hook>,
    pub(super) after: Option<Hook>,
}

// Poisoning only happens if a panic escapes while a guard is held; the
// guarded data is still consistent in every such path, so recover it.

pub(super) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(super) fn new(registry: TaskRegistry) -> Self {
        let task_count = AtomicUsize::new(registry.len());
        Self {
            registry: RwLock::new(registry),
            task_count,
            load: RwLock::new(LoadAccumulator::default()),
            hooks: RwLock::new(Hooks::default()),
            pass: Mutex::new(()),
            dispatcher: Mutex::new(None),
        }
    }

    /// Whether the calling thread is inside one of this scheduler's ticks,
    /// i.e. running one of its tasks or hooks.
    pub(super) fn in_dispatch(&self) -> bool {
        *lock(&self.dispatcher) == Some(thread::current().id())
    }

    /// Mutate the registry under its exclusive lock, keeping `task_count` in sync.
    pub(super) fn edit_registry<R>(&self, f: impl FnOnce(&mut TaskRegistry) -> R) -> R {
        let mut registry = write(&self.registry);
        let out = f(&mut registry);
        self.task_count.store(registry.len(), Ordering::Release);
        out
    }

    pub(super) fn stats(&self) -> SchedulerStats {
        let load = *read(&self.load);
        SchedulerStats {
            ticks: load.ticks,
            interval: load.interval,
            elapsed: load.elapsed(),
            busy: load.busy,
            load: load.ratio(),
            task_count: self.task_count.load(Ordering::Acquire),
            skipped_ticks: load.skipped,
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create an idle scheduler with no tasks and the default config.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    pub fn with_config(config: SchedulerConfig) -> Self {
        Self::from_parts(config, TaskRegistry::new())
    }

    fn from_parts(config: SchedulerConfig, registry: TaskRegistry) -> Self {
        Self {
            config,
            shared: Arc::new(Shared::new(registry)),
            lifecycle: Mutex::new(None),
            state: RwLock::new(ClockState::Idle),
            clock_thread: OnceLock::new(),
        }
    }

    /// Create an idle scheduler holding a copy of this one's registry.
    ///
    /// Entries are `Arc` clones, so `remove` on the copy matches the same
    /// task handles. Config is copied; hooks are not. Safe to call while
    /// this scheduler is running, from its tasks too.
    pub fn duplicate(&self) -> Self {
        let registry = read(&self.shared.registry).clone();
        Self::from_parts(self.config.clone(), registry)
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Register `tasks` to run every `period` ticks, in the given order.
    ///
    /// A period of zero or less is silently ignored. The same task may be
    /// added several times; each addition is an independent entry. Calls made
    /// while a tick is in flight, including from its own tasks and hooks,
    /// take effect from the next tick.
    pub fn add<I>(&self, period: i64, tasks: I)
    where
        I: IntoIterator<Item = TaskRef>,
    {
        self.shared.edit_registry(|registry| registry.add(period, tasks));
    }

    /// Remove one entry of `task` from each period it is registered under.
    ///
    /// Returns how many entries were removed; call again until it returns 0
    /// to purge duplicates within a period. A task may remove itself; an
    /// entry already picked for the in-flight tick still runs on that tick.
    pub fn remove<T: ?Sized>(&self, task: &Arc<T>) -> usize {
        self.shared.edit_registry(|registry| registry.remove(task))
    }

    /// Number of registered entries across all periods.
    pub fn task_count(&self) -> usize {
        self.shared.task_count.load(Ordering::Acquire)
    }

    /// Ticks fully processed since the clock was first started.
    pub fn ticks(&self) -> u64 {
        read(&self.shared.load).ticks
    }

    /// `interval × ticks`, with each tick counted at the interval in force
    /// when it was processed.
    pub fn elapsed(&self) -> Duration {
        read(&self.shared.load).elapsed()
    }

    /// Fraction of elapsed time spent running tasks; 0 before the first tick.
    pub fn load(&self) -> f64 {
        read(&self.shared.load).ratio()
    }

    pub fn skipped_ticks(&self) -> u64 {
        read(&self.shared.load).skipped
    }

    pub fn stats(&self) -> SchedulerStats {
        self.shared.stats()
    }

    pub fn state(&self) -> ClockState {
        *read(&self.state)
    }

    /// Call `hook` just before each tick's batch.
    pub fn set_before<F>(&self, hook: F)
    where
        F: Fn(&SchedulerStats) + Send + Sync + 'static,
    {
        write(&self.shared.hooks).before = Some(Arc::new(hook));
    }

    /// Call `hook` just after each tick's batch.
    pub fn set_after<F>(&self, hook: F)
    where
        F: Fn(&SchedulerStats) + Send + Sync + 'static,
    {
        write(&self.shared.hooks).after = Some(Arc::new(hook));
    }

    pub fn clear_hooks(&self) {
        *write(&self.shared.hooks) = Hooks::default();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("state", &self.state())
            .field("stats", &self.stats())
            .field("config", &self.config)
            .finish()
    }
}
