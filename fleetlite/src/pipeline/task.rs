//! Task trait for pipeline execution.

use async_trait::async_trait;
use fleetlite_shared::FleetResult;

/// A unit of work run against a shared, cloneable context.
#[async_trait]
pub trait PipelineTask<Ctx>: Send + Sync {
    async fn run(self: Box<Self>, ctx: Ctx) -> FleetResult<()>;

    /// Stable name, used in logs and metrics lookups.
    fn name(&self) -> &str;
}

pub type BoxedTask<Ctx> = Box<dyn PipelineTask<Ctx>>;
