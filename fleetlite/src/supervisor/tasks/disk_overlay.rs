//! Task: Disk overlay - per-VM qcow2 backed by the shared base image.

use super::{BringUpCtx, log_task_error, task_start};
use crate::disk::create_overlay;
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use fleetlite_shared::FleetResult;

pub struct DiskOverlayTask;

#[async_trait]
impl PipelineTask<BringUpCtx> for DiskOverlayTask {
    async fn run(self: Box<Self>, ctx: BringUpCtx) -> FleetResult<()> {
        let task_name = self.name();
        let index = task_start(&ctx, task_name).await;

        let (options, vm) = {
            let ctx = ctx.lock().await;
            (ctx.env.options.clone(), ctx.vm.clone())
        };

        vm.prepare()
            .inspect_err(|e| log_task_error(index, task_name, e))?;
        let disk = create_overlay(&options.hypervisor, &options.base_image, &vm.disk_path())
            .await
            .inspect_err(|e| log_task_error(index, task_name, e))?;

        ctx.lock().await.disk = Some(disk);
        Ok(())
    }

    fn name(&self) -> &str {
        "disk_overlay"
    }
}
