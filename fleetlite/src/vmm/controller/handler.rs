//! VmmHandler - Runtime operations on a running VM.

use crate::vmm::ExitInfo;
use fleetlite_shared::FleetResult;
use tokio::sync::watch;

/// Runtime operations on a running VM.
///
/// Separate from [`VmmController`](super::VmmController) so spawning and
/// lifecycle management stay independent.
pub trait VmmHandler: Send + Sync {
    /// Kill the VM process and everything it spawned.
    ///
    /// Safe to call more than once.
    fn stop(&mut self) -> FleetResult<()>;

    /// Check if the VM is still running.
    fn is_running(&self) -> bool;

    /// Process ID of the hypervisor.
    fn pid(&self) -> u32;

    /// Watch that turns `Some` once the hypervisor process has exited.
    fn exit_watch(&self) -> watch::Receiver<Option<ExitInfo>>;
}
