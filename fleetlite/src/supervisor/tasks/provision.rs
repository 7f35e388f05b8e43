//! Task: Provision - run the provisioning script over the serial console.
//!
//! The script races the hypervisor's exit watch, so a VM that dies mid-step
//! fails right away instead of waiting out the step timeout.

use super::{BringUpCtx, log_task_error, task_start};
use crate::console::ConsoleSession;
use crate::pipeline::PipelineTask;
use crate::provision::{ProvisioningScript, StepPhase};
use crate::supervisor::VmState;
use async_trait::async_trait;
use fleetlite_shared::{FleetError, FleetResult};

pub struct ProvisionTask;

#[async_trait]
impl PipelineTask<BringUpCtx> for ProvisionTask {
    async fn run(self: Box<Self>, ctx: BringUpCtx) -> FleetResult<()> {
        let task_name = self.name();
        let index = task_start(&ctx, task_name).await;

        let (env, state, console, logs, mut exit) = {
            let mut ctx = ctx.lock().await;
            let console = ctx
                .console
                .take()
                .ok_or_else(|| FleetError::Internal("vmm_spawn task must run first".into()))?;
            let exit = ctx
                .exit
                .clone()
                .ok_or_else(|| FleetError::Internal("vmm_spawn task must run first".into()))?;
            let logs = ctx
                .logs
                .take()
                .ok_or_else(|| FleetError::Internal("console_logs task must run first".into()))?;
            (ctx.env.clone(), ctx.state.clone(), console, logs, exit)
        };

        let options = &env.options;
        let script = ProvisioningScript::build(
            index,
            &env.plan,
            &options.credentials,
            &options.provision,
        )?;

        let (serial_log, transcript) = logs;
        let mut session = ConsoleSession::new(console)
            .with_delimiters(
                options.provision.send_delimiter.clone(),
                options.provision.frame_delimiter as u8,
            )
            .with_serial_log(serial_log)
            .with_transcript(transcript);

        let mut current_step = "";
        let outcome = {
            let run = script.run(&mut session, |step| {
                current_step = step.name;
                if step.phase == StepPhase::Configure && state.get() == VmState::Booting {
                    let _ = state.set(VmState::Configuring);
                }
            });
            tokio::select! {
                result = run => Ok(result),
                info = crate::vmm::exited(&mut exit) => Err(info),
            }
        };

        let result = match outcome {
            Ok(result) => result,
            Err(info) => Err(FleetError::provisioning(
                current_step,
                FleetError::StreamClosed {
                    during: format!("provisioning, hypervisor exited with {}", info),
                },
            )),
        };
        result.inspect_err(|e| log_task_error(index, task_name, e))?;

        ctx.lock().await.session = Some(session);
        Ok(())
    }

    fn name(&self) -> &str {
        "provision"
    }
}
