//! Task: Console logs - open the serial log and the interaction transcript.

use super::{BringUpCtx, log_task_error, task_start};
use crate::console::{ConsoleTranscript, SerialLog};
use crate::pipeline::PipelineTask;
use async_trait::async_trait;
use fleetlite_shared::FleetResult;

pub struct ConsoleLogsTask;

#[async_trait]
impl PipelineTask<BringUpCtx> for ConsoleLogsTask {
    async fn run(self: Box<Self>, ctx: BringUpCtx) -> FleetResult<()> {
        let task_name = self.name();
        let index = task_start(&ctx, task_name).await;

        let vm = ctx.lock().await.vm.clone();
        let logs = vm
            .prepare()
            .and_then(|_| {
                Ok((
                    SerialLog::open(vm.serial_log_path())?,
                    ConsoleTranscript::open(vm.transcript_path())?,
                ))
            })
            .inspect_err(|e| log_task_error(index, task_name, e))?;

        ctx.lock().await.logs = Some(logs);
        Ok(())
    }

    fn name(&self) -> &str {
        "console_logs"
    }
}
