pub mod config;
pub mod error;
pub mod scheduler;
pub mod tracer;

pub use config::SchedulerConfig;
pub use error::{ConfigError, SchedulerError};
pub use scheduler::{
    ClockState, DispatchReport, FnTask, Hook, Scheduler, SchedulerStats, Task, TaskError,
    TaskRef, TaskRegistry, due_indices, task_fn,
};
pub use tracer::{TaskTracer, TraceSnapshot, trace};
