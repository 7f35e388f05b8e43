//! Type definitions for the bring-up pipeline.

use super::VmEvent;
use super::state::StateTracker;
use crate::console::{ConsoleIo, ConsoleSession, ConsoleTranscript, SerialLog};
use crate::layout::{FleetLayout, VmLayout};
use crate::markers::MarkerStore;
use crate::network::NetworkPlan;
use crate::options::FleetOptions;
use crate::vmm::controller::{VmmController, VmmHandler};
use crate::vmm::{ExitInfo, ProcessRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};

/// Fleet-wide inputs shared by every supervisor.
#[derive(Clone)]
pub struct SupervisorEnv {
    pub options: Arc<FleetOptions>,
    pub layout: FleetLayout,
    pub plan: Arc<NetworkPlan>,
    pub markers: MarkerStore,
    pub controller: Arc<dyn VmmController>,
    pub registry: ProcessRegistry,
    pub events: mpsc::UnboundedSender<VmEvent>,
}

/// RAII guard for the hypervisor process.
///
/// Stops the VM and drops it from the process registry when dropped while
/// armed. Disarm only once the process is known to have exited.
pub struct CleanupGuard {
    index: usize,
    registry: ProcessRegistry,
    handler: Option<Box<dyn VmmHandler>>,
    armed: bool,
}

impl CleanupGuard {
    pub fn new(index: usize, registry: ProcessRegistry) -> Self {
        Self {
            index,
            registry,
            handler: None,
            armed: true,
        }
    }

    /// Register handler for cleanup.
    pub fn set_handler(&mut self, handler: Box<dyn VmmHandler>) {
        self.registry.register(self.index, handler.pid());
        self.handler = Some(handler);
    }

    pub fn handler(&self) -> Option<&dyn VmmHandler> {
        self.handler.as_deref()
    }

    /// Kill the VM process tree now. Idempotent.
    pub fn stop(&mut self) {
        if let Some(ref mut handler) = self.handler {
            if let Err(e) = handler.stop() {
                tracing::warn!(vm = self.index, "Failed to stop hypervisor: {}", e);
            }
        }
        self.registry.unregister(self.index);
    }

    /// Disarm the guard (call once the process has exited).
    ///
    /// After disarming, Drop will not perform cleanup.
    pub fn disarm(&mut self) {
        self.registry.unregister(self.index);
        self.armed = false;
    }
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if self.handler.as_ref().is_some_and(|h| h.is_running()) {
            tracing::warn!(vm = self.index, "Supervisor ended with VM still running, cleaning up");
        }
        self.stop();
    }
}

/// Shared bring-up pipeline context.
///
/// Stores shared inputs and the outputs each task hands to the next.
pub struct SupervisorContext {
    pub index: usize,
    pub env: SupervisorEnv,
    pub vm: VmLayout,
    pub state: StateTracker,
    pub guard: CleanupGuard,
    pub disk: Option<PathBuf>,
    pub logs: Option<(SerialLog, ConsoleTranscript)>,
    pub console: Option<ConsoleIo>,
    pub exit: Option<watch::Receiver<Option<ExitInfo>>>,
    /// Console session after provisioning; kept open so output keeps draining.
    pub session: Option<ConsoleSession>,
}

impl SupervisorContext {
    pub fn new(index: usize, env: SupervisorEnv, state: StateTracker) -> Self {
        let guard = CleanupGuard::new(index, env.registry.clone());
        let vm = env.layout.vm(index);
        Self {
            index,
            env,
            vm,
            state,
            guard,
            disk: None,
            logs: None,
            console: None,
            exit: None,
            session: None,
        }
    }
}

pub type SupervisorCtx = Arc<Mutex<SupervisorContext>>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vmm::controller::QemuHandler;
    use std::process::Command;

    #[test]
    fn test_guard_drop_kills_and_unregisters() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let registry = ProcessRegistry::new();
        let (_tx, exit) = watch::channel(None);

        let mut guard = CleanupGuard::new(0, registry.clone());
        guard.set_handler(Box::new(QemuHandler::new(0, child.id(), exit)));
        assert_eq!(registry.pids(), vec![(0, child.id())]);

        drop(guard);
        assert!(registry.is_empty());
        let status = child.wait().unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_disarmed_guard_leaves_process() {
        let mut child = Command::new("sleep").arg("30").spawn().unwrap();
        let registry = ProcessRegistry::new();
        let (_tx, exit) = watch::channel(None);

        let mut guard = CleanupGuard::new(1, registry.clone());
        guard.set_handler(Box::new(QemuHandler::new(1, child.id(), exit)));
        guard.disarm();
        drop(guard);

        assert!(registry.is_empty());
        assert!(crate::util::is_process_alive(child.id()));
        let _ = child.kill();
        let _ = child.wait();
    }
}
