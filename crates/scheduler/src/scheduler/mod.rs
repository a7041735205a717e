//! Tick-driven periodic scheduler with balanced same-period dispatch.
//!
//! Tasks are grouped by period (in ticks). A dedicated clock thread emits one
//! tick per interval; on each tick every due task runs sequentially, and
//! tasks sharing a period are spread across the ticks of that period rather
//! than firing together. A task that fails or panics is deregistered.

pub(crate) mod metrics;
pub mod registry;
pub mod runner;
pub mod task;
pub mod types;

pub use registry::{DispatchReport, TaskRegistry, due_indices};
pub use runner::Scheduler;
pub use task::{FnTask, Task, TaskError, TaskRef, task_fn};
pub use types::{ClockState, Hook, SchedulerStats};
