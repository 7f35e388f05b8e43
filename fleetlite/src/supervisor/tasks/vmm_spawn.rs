//! Task: VMM Spawn - start the hypervisor with the console on piped stdio.

use super::{BringUpCtx, log_task_error, task_start};
use crate::pipeline::PipelineTask;
use crate::supervisor::VmState;
use crate::vmm::InstanceSpec;
use async_trait::async_trait;
use fleetlite_shared::{FleetError, FleetResult};

pub struct VmmSpawnTask;

#[async_trait]
impl PipelineTask<BringUpCtx> for VmmSpawnTask {
    async fn run(self: Box<Self>, ctx: BringUpCtx) -> FleetResult<()> {
        let task_name = self.name();
        let index = task_start(&ctx, task_name).await;

        let (spec, controller) = {
            let mut ctx = ctx.lock().await;
            let disk = ctx
                .disk
                .take()
                .ok_or_else(|| FleetError::Internal("disk_overlay task must run first".into()))?;
            let network = ctx.env.plan.node(index)?.clone();
            (
                InstanceSpec {
                    index,
                    disk,
                    network,
                },
                ctx.env.controller.clone(),
            )
        };

        let instance = controller
            .start(&spec)
            .await
            .inspect_err(|e| log_task_error(index, task_name, e))?;

        let mut ctx = ctx.lock().await;
        ctx.exit = Some(instance.handler.exit_watch());
        ctx.console = Some(instance.console);
        ctx.guard.set_handler(instance.handler);
        ctx.state.set(VmState::Booting)?;
        Ok(())
    }

    fn name(&self) -> &str {
        "vmm_spawn"
    }
}
