//! Pipeline executor: runs stages in order, tasks per the stage's mode.

use super::metrics::{PipelineMetrics, StageMetrics, TaskMetrics};
use super::stage::{ExecutionMode, Stage};
use super::task::BoxedTask;
use fleetlite_shared::{FleetError, FleetResult};
use futures::future::try_join_all;
use std::time::Instant;

pub struct ExecutionPlan<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> ExecutionPlan<Ctx> {
    pub fn new(stages: Vec<Stage<BoxedTask<Ctx>>>) -> Self {
        Self { stages }
    }

    pub fn stages(self) -> Vec<Stage<BoxedTask<Ctx>>> {
        self.stages
    }
}

pub struct Pipeline<Ctx> {
    stages: Vec<Stage<BoxedTask<Ctx>>>,
}

impl<Ctx> Pipeline<Ctx> {
    pub fn from_plan(plan: ExecutionPlan<Ctx>) -> Self {
        Self {
            stages: plan.stages(),
        }
    }
}

pub struct PipelineExecutor;

impl PipelineExecutor {
    /// Execute a pipeline against a cloneable context.
    ///
    /// Stops at the first failing task. Tasks in a parallel stage that have
    /// not finished are dropped with the stage future.
    pub async fn execute<Ctx>(pipeline: Pipeline<Ctx>, ctx: Ctx) -> FleetResult<PipelineMetrics>
    where
        Ctx: Clone,
    {
        let total_start = Instant::now();
        let mut stage_metrics = Vec::new();

        for stage in pipeline.stages {
            let Stage {
                name: stage_name,
                tasks,
                execution,
            } = stage;
            let stage_start = Instant::now();

            let task_metrics = match execution {
                ExecutionMode::Parallel => {
                    let futures = tasks.into_iter().map(|task| {
                        let ctx = ctx.clone();
                        async move {
                            let name = task.name().to_string();
                            let task_start = Instant::now();
                            task.run(ctx).await?;
                            Ok::<TaskMetrics, FleetError>(TaskMetrics {
                                name,
                                duration_ms: task_start.elapsed().as_millis(),
                            })
                        }
                    });
                    try_join_all(futures).await
                }
                ExecutionMode::Sequential => {
                    let mut task_metrics = Vec::new();
                    let mut result = Ok(());
                    for task in tasks {
                        let name = task.name().to_string();
                        let task_start = Instant::now();
                        if let Err(e) = task.run(ctx.clone()).await {
                            result = Err(e);
                            break;
                        }
                        task_metrics.push(TaskMetrics {
                            name,
                            duration_ms: task_start.elapsed().as_millis(),
                        });
                    }
                    result.map(|()| task_metrics)
                }
            };
            let task_metrics = task_metrics.inspect_err(|e| {
                tracing::debug!(stage = stage_name, elapsed_ms = stage_start.elapsed().as_millis() as u64, "Stage failed: {}", e);
            })?;

            stage_metrics.push(StageMetrics {
                name: stage_name,
                execution,
                duration_ms: stage_start.elapsed().as_millis(),
                tasks: task_metrics,
            });
        }

        Ok(PipelineMetrics {
            total_duration_ms: total_start.elapsed().as_millis(),
            stages: stage_metrics,
        })
    }
}
