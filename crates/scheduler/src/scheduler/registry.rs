//! Period-bucketed task registry and the balanced dispatch pass.
//!
//! Entries sharing a period form a bucket. On tick `t`, entry `i` of a bucket
//! with period `p` is due when `i % p == t % p`, so a bucket of `k <= p`
//! entries spreads its work over `k` distinct ticks of each `p`-tick cycle.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{trace, warn};

use super::task::{Task, TaskError, TaskRef};

/// Outcome of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Entries invoked.
    pub ran: usize,
    /// Entries that failed and were removed.
    pub failed: usize,
}

/// Stable identity of one registry entry, independent of its position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct EntryId(u64);

#[derive(Clone)]
struct Entry {
    id: EntryId,
    task: TaskRef,
}

/// Ordered task entries keyed by period.
///
/// Buckets iterate in the order their period was first registered and are
/// pruned once empty.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    buckets: IndexMap<u64, Vec<Entry>>,
    next_id: u64,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `tasks` to the bucket for `period`, in order.
    ///
    /// A period of zero or less is ignored. Returns the number of entries added.
    pub fn add<I>(&mut self, period: i64, tasks: I) -> usize
    where
        I: IntoIterator<Item = TaskRef>,
    {
        let period = match u64::try_from(period) {
            Ok(p) if p > 0 => p,
            _ => {
                trace!(period, "ignoring registration with non-positive period");
                return 0;
            }
        };

        let start = self.next_id;
        let entries: Vec<Entry> = tasks
            .into_iter()
            .enumerate()
            .map(|(i, task)| Entry {
                id: EntryId(start + i as u64),
                task,
            })
            .collect();
        if entries.is_empty() {
            return 0;
        }
        let added = entries.len();
        self.next_id = start + added as u64;
        self.buckets.entry(period).or_default().extend(entries);
        trace!(period, added, "tasks registered");
        added
    }

    /// Remove the first entry matching `task` from every bucket that holds it.
    ///
    /// Matching is by allocation, so clones of the same `Arc` match while
    /// equal but separately allocated tasks do not. At most one entry per
    /// bucket is removed per call; the order of the remaining entries is kept.
    /// Returns the number of entries removed.
    pub fn remove<T: ?Sized>(&mut self, task: &Arc<T>) -> usize {
        let target = Arc::as_ptr(task).cast::<()>();
        let mut removed = 0;
        for bucket in self.buckets.values_mut() {
            if let Some(pos) = bucket
                .iter()
                .position(|entry| Arc::as_ptr(&entry.task).cast::<()>() == target)
            {
                bucket.remove(pos);
                removed += 1;
            }
        }
        self.prune();
        trace!(removed, "task removed");
        removed
    }

    /// Total number of entries, duplicates included.
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Number of entries registered under `period`.
    pub fn bucket_len(&self, period: u64) -> usize {
        self.buckets.get(&period).map_or(0, Vec::len)
    }

    /// Registered periods in iteration order.
    pub fn periods(&self) -> Vec<u64> {
        self.buckets.keys().copied().collect()
    }

    /// Run every entry due on `tick`, bucket by bucket, in index order.
    ///
    /// An entry whose run fails or panics is removed once the batch is done.
    /// The rest of the batch still runs.
    pub fn dispatch(&mut self, tick: u64) -> DispatchReport {
        let outcome = self.due(tick).run();
        self.retire(&outcome.failed);
        outcome.report
    }

    /// Snapshot the entries due on `tick`, in dispatch order.
    ///
    /// The batch owns its task handles, so the registry may change while it
    /// runs; such changes apply from the next tick.
    pub(crate) fn due(&self, tick: u64) -> DueBatch {
        let mut entries = Vec::new();
        for (&period, bucket) in &self.buckets {
            entries.extend(
                due_indices(bucket.len(), period, tick).map(|i| (period, bucket[i].clone())),
            );
        }
        DueBatch { tick, entries }
    }

    /// Remove the entries with the given ids. Ids no longer present are skipped.
    pub(crate) fn retire(&mut self, ids: &[EntryId]) -> usize {
        if ids.is_empty() {
            return 0;
        }
        let before = self.len();
        for bucket in self.buckets.values_mut() {
            bucket.retain(|entry| !ids.contains(&entry.id));
        }
        self.prune();
        before - self.len()
    }

    fn prune(&mut self) {
        self.buckets.retain(|_, bucket| !bucket.is_empty());
    }
}

/// Entries due on one tick, detached from the registry.
pub(crate) struct DueBatch {
    tick: u64,
    entries: Vec<(u64, Entry)>,
}

/// Result of running a [`DueBatch`].
pub(crate) struct BatchOutcome {
    pub(crate) report: DispatchReport,
    /// Entries to deregister.
    pub(crate) failed: Vec<EntryId>,
}

impl DueBatch {
    /// Run every entry in order; failures and panics are collected, not propagated.
    pub(crate) fn run(self) -> BatchOutcome {
        let tick = self.tick;
        let mut failed = Vec::new();
        for (period, entry) in &self.entries {
            if let Err(e) = run_guarded(entry.task.as_ref()) {
                warn!(
                    task = entry.task.name(),
                    period,
                    tick,
                    error = %e,
                    "task failed, removing from scheduler"
                );
                failed.push(entry.id);
            }
        }
        BatchOutcome {
            report: DispatchReport {
                ran: self.entries.len(),
                failed: failed.len(),
            },
            failed,
        }
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.buckets.iter().map(|(period, bucket)| (period, bucket.len())))
            .finish()
    }
}

/// Indices of a `len`-entry bucket with period `period` that are due on `tick`.
pub fn due_indices(len: usize, period: u64, tick: u64) -> impl Iterator<Item = usize> {
    debug_assert!(period > 0, "period must be positive");
    let step = usize::try_from(period).unwrap_or(usize::MAX).max(1);
    let start = usize::try_from(tick % period).unwrap_or(usize::MAX);
    (start..len).step_by(step)
}

/// Run a task, turning a panic into [`TaskError::Panicked`].
fn run_guarded(task: &dyn Task) -> Result<(), TaskError> {
    match panic::catch_unwind(AssertUnwindSafe(|| task.run())) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::Panicked(panic_message(&*payload))),
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::scheduler::task::task_fn;

    /// Appends its label to a shared log on every run.
    struct Recorder {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Task for Recorder {
        fn run(&self) -> Result<(), TaskError> {
            self.log.lock().unwrap().push(self.label);
            Ok(())
        }
    }

    fn recorder(label: &'static str, log: &Arc<Mutex<Vec<&'static str>>>) -> TaskRef {
        Arc::new(Recorder {
            label,
            log: Arc::clone(log),
        })
    }

    fn drain(log: &Arc<Mutex<Vec<&'static str>>>) -> Vec<&'static str> {
        std::mem::take(&mut *log.lock().unwrap())
    }

    #[test]
    fn due_indices_follow_tick_phase() {
        assert_eq!(due_indices(3, 2, 0).collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(due_indices(3, 2, 1).collect::<Vec<_>>(), vec![1]);
        assert_eq!(due_indices(3, 5, 4).collect::<Vec<_>>(), Vec::<usize>::new());
        assert_eq!(due_indices(0, 1, 7).count(), 0);
    }

    #[test]
    fn every_entry_runs_floor_or_ceil_times_per_cycle() {
        for period in 1..=6u64 {
            for len in 0..=13usize {
                for offset in 0..period {
                    let mut runs = vec![0usize; len];
                    for tick in offset..offset + period {
                        for i in due_indices(len, period, tick) {
                            runs[i] += 1;
                        }
                    }
                    // Each index is due exactly once per period-length window.
                    assert!(
                        runs.iter().all(|&r| r == 1),
                        "period={period} len={len} offset={offset} runs={runs:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn entries_of_small_bucket_fire_on_distinct_ticks() {
        let period = 5u64;
        let len = 3usize;
        let firing_ticks: Vec<Vec<u64>> = (0..len)
            .map(|i| (0..period).filter(|&t| due_indices(len, period, t).any(|d| d == i)).collect())
            .collect();
        assert_eq!(firing_ticks, vec![vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn batch_size_grows_when_bucket_exceeds_period() {
        let per_tick: Vec<usize> = (0..3).map(|t| due_indices(7, 3, t).count()).collect();
        assert_eq!(per_tick, vec![3, 2, 2]);
    }

    #[test]
    fn non_positive_period_is_ignored() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = TaskRegistry::new();
        assert_eq!(registry.add(0, [recorder("a", &log)]), 0);
        assert_eq!(registry.add(-3, [recorder("b", &log)]), 0);
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn len_counts_duplicates() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", &log);
        let mut registry = TaskRegistry::new();
        registry.add(2, [Arc::clone(&a), Arc::clone(&a)]);
        registry.add(3, [Arc::clone(&a)]);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.bucket_len(2), 2);
        assert_eq!(registry.periods(), vec![2, 3]);
    }

    #[test]
    fn remove_takes_first_match_per_bucket_and_keeps_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", &log);
        let b = recorder("b", &log);
        let c = recorder("c", &log);

        let mut registry = TaskRegistry::new();
        registry.add(1, [Arc::clone(&b), Arc::clone(&a), Arc::clone(&c), Arc::clone(&a)]);
        registry.add(4, [Arc::clone(&a), Arc::clone(&b)]);
        registry.add(9, [Arc::clone(&c)]);

        assert_eq!(registry.remove(&a), 2);
        assert_eq!(registry.len(), 5);

        registry.dispatch(0);
        // Period 1 runs everything left, in order; period 4 phase 0 runs `b`.
        assert_eq!(drain(&log), vec!["b", "c", "a", "b", "c"]);
    }

    #[test]
    fn remove_matches_identity_not_value() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = recorder("same", &log);
        let second = recorder("same", &log);

        let mut registry = TaskRegistry::new();
        registry.add(1, [Arc::clone(&first)]);
        assert_eq!(registry.remove(&second), 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_accepts_concrete_arc() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let concrete = Arc::new(task_fn("concrete", move || {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }));

        let mut registry = TaskRegistry::new();
        registry.add(3, [concrete.clone() as TaskRef]);
        assert_eq!(registry.remove(&concrete), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn emptied_bucket_is_pruned() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", &log);
        let mut registry = TaskRegistry::new();
        registry.add(5, [Arc::clone(&a)]);
        registry.remove(&a);
        assert!(registry.periods().is_empty());
        assert_eq!(registry.dispatch(0), DispatchReport::default());
    }

    #[test]
    fn failing_entry_is_removed_and_batch_continues() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", &log);
        let fail: TaskRef = Arc::new(task_fn("fail", || Err(TaskError::failed("nope"))));
        let c = recorder("c", &log);

        let mut registry = TaskRegistry::new();
        registry.add(1, [Arc::clone(&a), Arc::clone(&fail), Arc::clone(&c)]);

        let report = registry.dispatch(0);
        assert_eq!(report, DispatchReport { ran: 3, failed: 1 });
        assert_eq!(drain(&log), vec!["a", "c"]);
        assert_eq!(registry.len(), 2);

        let report = registry.dispatch(1);
        assert_eq!(report, DispatchReport { ran: 2, failed: 0 });
    }

    #[test]
    fn failure_removes_only_the_failing_entry() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        // Fails on its first run only.
        let flaky: TaskRef = Arc::new(task_fn("flaky", move || {
            if counter.fetch_add(1, Ordering::Relaxed) == 0 {
                Err(TaskError::failed("first run"))
            } else {
                Ok(())
            }
        }));

        let mut registry = TaskRegistry::new();
        registry.add(1, [Arc::clone(&flaky)]);
        registry.add(2, [Arc::clone(&flaky)]);

        let report = registry.dispatch(0);
        assert_eq!(report.failed, 1);
        assert_eq!(registry.bucket_len(1), 0);
        assert_eq!(registry.bucket_len(2), 1);
    }

    #[test]
    fn panicking_entry_is_removed() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let boom: TaskRef = Arc::new(task_fn("boom", || panic!("kaboom")));
        let a = recorder("a", &log);

        let mut registry = TaskRegistry::new();
        registry.add(1, [Arc::clone(&boom), Arc::clone(&a)]);

        let report = registry.dispatch(0);
        assert_eq!(report.failed, 1);
        assert_eq!(drain(&log), vec!["a"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn due_batch_is_detached_from_later_edits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", &log);
        let b = recorder("b", &log);

        let mut registry = TaskRegistry::new();
        registry.add(1, [Arc::clone(&a)]);

        let batch = registry.due(0);
        registry.remove(&a);
        registry.add(1, [Arc::clone(&b)]);

        let outcome = batch.run();
        assert_eq!(outcome.report, DispatchReport { ran: 1, failed: 0 });
        assert_eq!(drain(&log), vec!["a"]);

        registry.dispatch(1);
        assert_eq!(drain(&log), vec!["b"]);
    }

    #[test]
    fn retire_skips_entries_already_removed() {
        let fail: TaskRef = Arc::new(task_fn("fail", || Err(TaskError::failed("nope"))));
        let mut registry = TaskRegistry::new();
        registry.add(1, [Arc::clone(&fail), Arc::clone(&fail)]);

        let outcome = registry.due(0).run();
        assert_eq!(outcome.failed.len(), 2);

        registry.remove(&fail);
        assert_eq!(registry.retire(&outcome.failed), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn panic_message_extracts_strings() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(&*owned), "owned");
        assert_eq!(panic_message(&*borrowed), "borrowed");
        assert_eq!(panic_message(&*other), "non-string panic payload");
    }

    #[test]
    fn clone_is_independent() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let a = recorder("a", &log);
        let mut registry = TaskRegistry::new();
        registry.add(1, [Arc::clone(&a)]);

        let mut copy = registry.clone();
        copy.remove(&a);
        assert_eq!(registry.len(), 1);
        assert!(copy.is_empty());
    }
}
