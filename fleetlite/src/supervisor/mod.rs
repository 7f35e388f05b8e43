//! Per-VM supervision.
//!
//! ## Architecture
//!
//! Bring-up is table-driven:
//!
//! ```text
//!   1. DiskOverlay ─┬─  (qcow2 overlay of the base image)
//!      ConsoleLogs ─┘   (serial log + transcript)
//!   2. VmmSpawn         (start hypervisor, register PID)        → Booting
//!   3. Provision        (script over the console, races exit)   → Configuring
//! ```
//!
//! Afterwards the supervisor reports the outcome and, on success, holds the VM
//! until the coordinator asks for shutdown or cancellation. The VM process is
//! owned by the supervisor's `CleanupGuard`, so it is killed on every path
//! that does not observe it exiting on its own.

mod state;
mod tasks;
mod types;

pub use state::{StateTracker, VmState};
pub use types::{CleanupGuard, SupervisorContext, SupervisorCtx, SupervisorEnv};

use crate::console::ConsoleSession;
use crate::markers::{MarkerKind, MarkerRecord};
use crate::pipeline::{
    BoxedTask, ExecutionPlan, Pipeline, PipelineExecutor, PipelineMetrics, Stage,
};
use crate::vmm::ExitInfo;
use chrono::Utc;
use fleetlite_shared::{FleetError, FleetResult};
use std::sync::Arc;
use tasks::{ConsoleLogsTask, DiskOverlayTask, ProvisionTask, VmmSpawnTask};
use tokio::sync::{Mutex, watch};

/// Fleet-wide control signal, broadcast to every supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    /// The guests are powering off; wait for the processes to exit.
    Shutdown,
    /// Kill everything now.
    Cancel,
}

/// Progress reported by a supervisor to the coordinator.
#[derive(Debug)]
pub enum VmEvent {
    StateChanged { index: usize, state: VmState },
    /// Always a `FleetError::Vm`.
    Failed { index: usize, error: FleetError },
}

impl VmEvent {
    pub fn index(&self) -> usize {
        match self {
            VmEvent::StateChanged { index, .. } | VmEvent::Failed { index, .. } => *index,
        }
    }
}

fn execution_plan() -> ExecutionPlan<SupervisorCtx> {
    let stages: Vec<Stage<BoxedTask<SupervisorCtx>>> = vec![
        Stage::parallel(
            "prepare",
            vec![Box::new(DiskOverlayTask), Box::new(ConsoleLogsTask)],
        ),
        Stage::sequential("spawn", vec![Box::new(VmmSpawnTask)]),
        Stage::sequential("provision", vec![Box::new(ProvisionTask)]),
    ];
    ExecutionPlan::new(stages)
}

/// Why a held VM was released.
enum Release {
    Shutdown,
    Cancel,
    Exited(ExitInfo),
}

/// Owns one VM from disk creation to teardown.
pub struct VmSupervisor {
    index: usize,
    env: SupervisorEnv,
}

impl VmSupervisor {
    pub fn new(index: usize, env: SupervisorEnv) -> Self {
        Self { index, env }
    }

    /// Drive the VM until it fails, is cancelled, or is released after
    /// being ready. Returns the final state.
    pub async fn run(self, mut control: watch::Receiver<Control>) -> VmState {
        let index = self.index;
        let state = StateTracker::new(index, self.env.events.clone());
        let ctx: SupervisorCtx = Arc::new(Mutex::new(SupervisorContext::new(
            index,
            self.env.clone(),
            state.clone(),
        )));

        tracing::info!(vm = index, "Starting VM bring-up");
        let bring_up = tokio::select! {
            result = Self::bring_up(ctx.clone()) => Some(result),
            _ = wait_cancel(&mut control) => None,
        };

        match bring_up {
            None => {
                tracing::info!(vm = index, state = %state.get(), "Bring-up cancelled");
                ctx.lock().await.guard.stop();
                let _ = state.set(VmState::Stopped);
            }
            Some(Err(error)) => self.fail(&ctx, &state, error).await,
            Some(Ok(metrics)) => {
                metrics.log(index);
                match self.write_marker(MarkerKind::Ready, None) {
                    Ok(()) => {
                        let _ = state.set(VmState::Ready);
                        tracing::info!(vm = index, "VM ready");
                        self.hold(&ctx, &state, &mut control).await;
                    }
                    Err(error) => self.fail(&ctx, &state, error).await,
                }
            }
        }

        // Whatever is left (cancelled bring-up, failure) is killed here
        drop(ctx);
        state.get()
    }

    async fn bring_up(ctx: SupervisorCtx) -> FleetResult<PipelineMetrics> {
        let pipeline = Pipeline::from_plan(execution_plan());
        PipelineExecutor::execute(pipeline, ctx).await
    }

    /// Kill the VM, write its failure marker and report the error.
    async fn fail(&self, ctx: &SupervisorCtx, state: &StateTracker, error: FleetError) {
        let index = self.index;
        let phase = state.get();
        ctx.lock().await.guard.stop();
        let _ = state.set(VmState::Failed);

        let error = FleetError::Vm {
            index,
            phase: phase.to_string(),
            transcript: self.env.layout.vm(index).transcript_path(),
            source: Box::new(error),
        };
        tracing::error!(vm = index, phase = %phase, step = error.failed_step(), "{}", error);

        if let Err(e) = self.write_marker(
            MarkerKind::Failed,
            Some((error.failed_step().map(str::to_string), error.to_string())),
        ) {
            tracing::warn!(vm = index, "Failed to write failure marker: {}", e);
        }

        let _ = self.env.events.send(VmEvent::Failed { index, error });
    }

    fn write_marker(
        &self,
        kind: MarkerKind,
        failure: Option<(Option<String>, String)>,
    ) -> FleetResult<()> {
        let vm = self.env.layout.vm(self.index);
        let (step, error) = match failure {
            Some((step, error)) => (step, Some(error)),
            None => (None, None),
        };
        self.env.markers.write(&MarkerRecord {
            index: self.index,
            kind,
            step,
            error,
            transcript: vm.transcript_path(),
            serial_log: vm.serial_log_path(),
            at: Utc::now(),
        })?;
        Ok(())
    }

    /// Keep a ready VM alive until released.
    async fn hold(
        &self,
        ctx: &SupervisorCtx,
        state: &StateTracker,
        control: &mut watch::Receiver<Control>,
    ) {
        let index = self.index;
        let (mut session, mut exit) = {
            let mut ctx = ctx.lock().await;
            (ctx.session.take(), ctx.exit.clone())
        };
        let Some(exit) = exit.as_mut() else {
            self.fail(
                ctx,
                state,
                FleetError::Internal("ready VM without exit watch".into()),
            )
            .await;
            return;
        };

        let release = tokio::select! {
            release = wait_release(control) => release,
            info = crate::vmm::exited(exit) => Release::Exited(info),
            _ = keep_draining(session.as_mut()) => Release::Cancel,
        };

        match release {
            Release::Cancel => {
                tracing::info!(vm = index, "Stopping VM");
                ctx.lock().await.guard.stop();
            }
            Release::Shutdown => {
                tracing::info!(vm = index, "Waiting for VM to power off");
                let exited = tokio::select! {
                    info = crate::vmm::exited(exit) => Some(info),
                    _ = wait_cancel(control) => None,
                    _ = keep_draining(session.as_mut()) => None,
                };
                match exited {
                    Some(info) => {
                        tracing::info!(vm = index, status = %info, "VM powered off");
                        ctx.lock().await.guard.disarm();
                    }
                    None => ctx.lock().await.guard.stop(),
                }
            }
            Release::Exited(info) => {
                ctx.lock().await.guard.disarm();
                self.fail(
                    ctx,
                    state,
                    FleetError::StreamClosed {
                        during: format!("hold, hypervisor exited with {}", info),
                    },
                )
                .await;
                return;
            }
        }
        let _ = state.set(VmState::Stopped);
    }
}

/// Resolve once `Cancel` is broadcast or the coordinator is gone.
async fn wait_cancel(control: &mut watch::Receiver<Control>) {
    let _ = control.wait_for(|c| *c == Control::Cancel).await;
}

async fn wait_release(control: &mut watch::Receiver<Control>) -> Release {
    match control.wait_for(|c| *c != Control::Run).await {
        Ok(c) if *c == Control::Shutdown => Release::Shutdown,
        _ => Release::Cancel,
    }
}

/// Read console output for as long as the VM lives. Never completes.
async fn keep_draining(session: Option<&mut ConsoleSession>) {
    if let Some(session) = session {
        session.drain().await;
    }
    std::future::pending::<()>().await
}
