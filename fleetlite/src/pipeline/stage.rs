//! Named stages of a bring-up plan.

/// How the tasks of one stage are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// All tasks polled concurrently; the first error wins.
    Parallel,
    /// Tasks run one after another.
    Sequential,
}

/// A named group of tasks. The name shows up in metrics and failure logs.
#[derive(Debug, Clone)]
pub struct Stage<T> {
    pub name: &'static str,
    pub tasks: Vec<T>,
    pub execution: ExecutionMode,
}

impl<T> Stage<T> {
    pub fn parallel(name: &'static str, tasks: Vec<T>) -> Self {
        Self::with_mode(name, tasks, ExecutionMode::Parallel)
    }

    pub fn sequential(name: &'static str, tasks: Vec<T>) -> Self {
        Self::with_mode(name, tasks, ExecutionMode::Sequential)
    }

    fn with_mode(name: &'static str, tasks: Vec<T>, execution: ExecutionMode) -> Self {
        Self {
            name,
            tasks,
            execution,
        }
    }
}
