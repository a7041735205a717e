use std::sync::Arc;

/// Error reported by a [`Task`] run.
///
/// The scheduler never retries: any error deregisters the entry that
/// produced it.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task failed: {0}")]
    Failed(String),
    #[error("Task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }
}

/// A unit of periodic work that the scheduler can dispatch.
///
/// Runs happen sequentially on the scheduler's clock thread. A task may add
/// or remove tasks on the scheduler running it, itself included; such edits
/// apply from the next tick.
pub trait Task: Send + Sync {
    /// Perform one run. Returning an error removes this entry from the scheduler.
    fn run(&self) -> Result<(), TaskError>;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Shared handle under which tasks are registered. Identity is the allocation.
pub type TaskRef = Arc<dyn Task>;

impl<T: Task + ?Sized> Task for Arc<T> {
    fn run(&self) -> Result<(), TaskError> {
        (**self).run()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<T: Task + ?Sized> Task for Box<T> {
    fn run(&self) -> Result<(), TaskError> {
        (**self).run()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Adapts a closure into a named [`Task`].
pub struct FnTask<F> {
    name: String,
    f: F,
}

/// Wrap `f` as a task called `name`.
pub fn task_fn<F>(name: impl Into<String>, f: F) -> FnTask<F>
where
    F: Fn() -> Result<(), TaskError> + Send + Sync,
{
    FnTask {
        name: name.into(),
        f,
    }
}

impl<F> Task for FnTask<F>
where
    F: Fn() -> Result<(), TaskError> + Send + Sync,
{
    fn run(&self) -> Result<(), TaskError> {
        (self.f)()
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> std::fmt::Debug for FnTask<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTask").field("name", &self.name).finish()
    }
}
