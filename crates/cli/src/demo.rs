use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use tickwork_scheduler::{
    Scheduler, SchedulerStats, Task, TaskError, TaskRef, TaskTracer, TraceSnapshot, task_fn, trace,
};

type Traced = Arc<TaskTracer<Box<dyn Task>>>;

/// A registered demo task and the period it runs at.
pub struct DemoTask {
    pub period: i64,
    pub tracer: Traced,
}

#[derive(Debug, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub period: i64,
    pub registered: bool,
    pub trace: TraceSnapshot,
}

#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub scheduler: SchedulerStats,
    pub tasks: Vec<TaskReport>,
}

fn traced(task: impl Task + 'static) -> Traced {
    Arc::new(trace(Box::new(task) as Box<dyn Task>))
}

/// Build the demo workload: a cheap heartbeat every tick, a slower sampler
/// every third tick, and a flaky task that fails once it has run
/// `fail_after` times.
pub fn tasks(fail_after: usize) -> Vec<DemoTask> {
    let beats = AtomicUsize::new(0);
    let heartbeat = traced(task_fn("heartbeat", move || {
        let n = beats.fetch_add(1, Ordering::Relaxed);
        debug!(beat = n, "heartbeat");
        Ok(())
    }));

    let samples = AtomicUsize::new(0);
    let sampler = traced(task_fn("sampler", move || {
        let n = samples.fetch_add(1, Ordering::Relaxed);
        // Vary the cost so the tracer has a spread to report.
        thread::sleep(Duration::from_millis(1 + (n % 4) as u64));
        Ok(())
    }));

    let runs = AtomicUsize::new(0);
    let flaky = traced(task_fn("flaky", move || {
        if runs.fetch_add(1, Ordering::Relaxed) >= fail_after {
            return Err(TaskError::failed(format!("gave up after {fail_after} runs")));
        }
        Ok(())
    }));

    vec![
        DemoTask { period: 1, tracer: heartbeat },
        DemoTask { period: 3, tracer: sampler },
        DemoTask { period: 2, tracer: flaky },
    ]
}

pub fn register(scheduler: &Scheduler, tasks: &[DemoTask]) {
    for task in tasks {
        scheduler.add(task.period, [Arc::clone(&task.tracer) as TaskRef]);
        info!(task = task.tracer.name(), period = task.period, "registered demo task");
    }
}

/// Collect the report, deregistering every demo task on the way.
///
/// `registered` tells whether the task was still scheduled at the end; a
/// task that failed has already been dropped by the scheduler.
pub fn report(scheduler: &Scheduler, tasks: &[DemoTask]) -> DemoReport {
    let stats = scheduler.stats();
    let tasks = tasks
        .iter()
        .map(|task| TaskReport {
            name: task.tracer.name().to_string(),
            period: task.period,
            registered: scheduler.remove(&task.tracer) > 0,
            trace: task.tracer.snapshot(),
        })
        .collect();
    DemoReport {
        scheduler: stats,
        tasks,
    }
}
