use crate::pipeline::ExecutionMode;

#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub name: String,
    pub duration_ms: u128,
}

#[derive(Debug, Clone)]
pub struct StageMetrics {
    pub name: &'static str,
    pub execution: ExecutionMode,
    pub duration_ms: u128,
    pub tasks: Vec<TaskMetrics>,
}

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_duration_ms: u128,
    pub stages: Vec<StageMetrics>,
}

impl PipelineMetrics {
    pub fn task_duration_ms(&self, name: &str) -> Option<u128> {
        self.tasks().find(|task| task.name == name).map(|task| task.duration_ms)
    }

    /// All task metrics in execution order.
    pub fn tasks(&self) -> impl Iterator<Item = &TaskMetrics> {
        self.stages.iter().flat_map(|stage| stage.tasks.iter())
    }

    /// Log per-stage and per-task durations at debug level and the total
    /// at info level.
    pub fn log(&self, vm: usize) {
        for stage in &self.stages {
            tracing::debug!(vm, stage = stage.name, mode = ?stage.execution, duration_ms = stage.duration_ms as u64, "Bring-up stage finished");
            for task in &stage.tasks {
                tracing::debug!(vm, stage = stage.name, task = %task.name, duration_ms = task.duration_ms as u64, "Bring-up task finished");
            }
        }
        tracing::info!(vm, total_ms = self.total_duration_ms as u64, "Bring-up pipeline finished");
    }
}
