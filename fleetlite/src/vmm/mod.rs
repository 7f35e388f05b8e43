//! Hypervisor processes.
//!
//! - [`controller::VmmController`] starts a VM and returns a [`VmInstance`]
//! - [`controller::VmmHandler`] stops and observes a running VM
//! - [`ProcessRegistry`] records every live hypervisor PID for last-resort cleanup

pub mod controller;
#[cfg(test)]
pub(crate) mod fake;
mod registry;

pub use registry::ProcessRegistry;

use crate::console::ConsoleIo;
use crate::network::NodeNetwork;
use controller::VmmHandler;
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::ExitStatus;
use tokio::sync::watch;

/// Everything needed to start one VM.
#[derive(Debug, Clone)]
pub struct InstanceSpec {
    pub index: usize,
    /// COW overlay the VM boots from.
    pub disk: PathBuf,
    pub network: NodeNetwork,
}

/// A started VM: its lifecycle handler plus the console byte stream.
pub struct VmInstance {
    pub handler: Box<dyn VmmHandler>,
    pub console: ConsoleIo,
}

impl fmt::Debug for VmInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmInstance")
            .field("pid", &self.handler.pid())
            .finish_non_exhaustive()
    }
}

/// How a hypervisor process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl From<ExitStatus> for ExitInfo {
    fn from(status: ExitStatus) -> Self {
        Self {
            code: status.code(),
            signal: status.signal(),
        }
    }
}

impl fmt::Display for ExitInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.code, self.signal) {
            (Some(code), _) => write!(f, "exit code {}", code),
            (None, Some(signal)) => write!(f, "signal {}", signal),
            (None, None) => write!(f, "unknown status"),
        }
    }
}

/// Wait until the hypervisor behind `exit` has exited.
///
/// A watch whose sender went away without a value counts as an exit with
/// unknown status.
pub async fn exited(exit: &mut watch::Receiver<Option<ExitInfo>>) -> ExitInfo {
    let unknown = ExitInfo {
        code: None,
        signal: None,
    };
    match exit.wait_for(|info| info.is_some()).await {
        Ok(info) => (*info).unwrap_or(unknown),
        Err(_) => unknown,
    }
}
