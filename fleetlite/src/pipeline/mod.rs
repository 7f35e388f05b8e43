//! Table-driven stage/task execution used for VM bring-up.
//!
//! ```text
//! Pipeline → Stages → Tasks
//!
//! - Pipeline: runs stages in order, stops at the first failing task
//! - Stage: groups tasks with an execution mode (parallel/sequential)
//! - Task: one unit of work against a shared context
//! ```
//!
//! ## Example
//!
//! ```ignore
//! let plan = ExecutionPlan::new(vec![
//!     Stage::parallel("prepare", vec![Box::new(DiskOverlayTask), Box::new(ConsoleLogsTask)]),
//!     Stage::sequential("spawn", vec![Box::new(VmmSpawnTask)]),
//! ]);
//! let metrics = PipelineExecutor::execute(Pipeline::from_plan(plan), ctx).await?;
//! tracing::info!("bring-up took {}ms", metrics.total_duration_ms);
//! ```

mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;
mod task;

pub use metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
pub use pipeline::{ExecutionPlan, Pipeline, PipelineExecutor};
pub use stage::{ExecutionMode, Stage};
pub use task::{BoxedTask, PipelineTask};
