//! Hypervisor controllers.
//!
//! ## Architecture
//!
//! - **VmmController**: Spawning operations (creates VmmHandler and console)
//! - **VmmHandler**: Runtime operations on running VM (stop, liveness)
//!
//! The caller builds the ConsoleSession from the returned console stream.

mod handler;
mod qemu;
mod spawn;

use crate::vmm::{InstanceSpec, VmInstance};
use fleetlite_shared::FleetResult;
pub use handler::VmmHandler;
pub use qemu::{QemuController, QemuHandler};
#[cfg(test)]
pub(crate) use spawn::spawn_subprocess;

/// Trait for spawning VMs.
///
/// One controller is shared by every supervisor in a fleet.
#[async_trait::async_trait]
pub trait VmmController: Send + Sync {
    /// Start a VM with its console on the returned stream.
    async fn start(&self, spec: &InstanceSpec) -> FleetResult<VmInstance>;
}
