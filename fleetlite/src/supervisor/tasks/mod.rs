//! Bring-up pipeline tasks.

mod console_logs;
mod disk_overlay;
mod provision;
mod vmm_spawn;

pub use console_logs::ConsoleLogsTask;
pub use disk_overlay::DiskOverlayTask;
pub use provision::ProvisionTask;
pub use vmm_spawn::VmmSpawnTask;

pub use super::types::SupervisorCtx as BringUpCtx;
use fleetlite_shared::FleetError;

/// Log task start and return the VM index.
async fn task_start(ctx: &BringUpCtx, task_name: &str) -> usize {
    let index = ctx.lock().await.index;
    tracing::debug!(vm = index, task = task_name, "Starting bring-up task");
    index
}

fn log_task_error(index: usize, task_name: &str, error: &FleetError) {
    tracing::error!(vm = index, task = task_name, "Bring-up task failed: {}", error);
}
