//! fleetlite: parallel VM provisioning and cluster bootstrap.
//!
//! Brings up N VMs from one base image, configures each over its serial
//! console, waits for the whole fleet, then assembles a multi-node cluster
//! over guest command execution.

pub mod cluster;
pub mod console;
pub mod disk;
pub mod fleet;
pub mod layout;
pub mod markers;
pub mod network;
pub mod options;
pub mod pipeline;
pub mod provision;
pub mod supervisor;
pub mod util;
pub mod vmm;

pub use cluster::{ClusterAssembler, ClusterReport, GuestExec, SshExec};
pub use fleet::{Fleet, FleetCoordinator, VmStatus};
pub use fleetlite_shared::{FleetError, FleetResult};
pub use layout::FleetLayout;
pub use options::FleetOptions;
pub use supervisor::VmState;
pub use vmm::controller::{QemuController, VmmController};

use fleetlite_shared::constants::files;
use std::io::IsTerminal;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

static LOG_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the global subscriber: a daily-rotated file under the run's
/// `logs/` directory plus stderr.
///
/// The filter comes from `RUST_LOG` (default `info`). Only the first call
/// installs anything.
pub fn init_logging_for(layout: &FleetLayout) -> FleetResult<()> {
    if LOG_GUARD.get().is_some() {
        return Ok(());
    }

    let logs_dir = layout.logs_dir();
    std::fs::create_dir_all(&logs_dir).map_err(|e| {
        FleetError::Storage(format!(
            "Failed to create log directory {}: {}",
            logs_dir.display(),
            e
        ))
    })?;

    let appender = tracing_appender::rolling::daily(&logs_dir, files::LOG_FILE_PREFIX);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(std::io::stderr().is_terminal())
                .with_writer(std::io::stderr),
        )
        .try_init();

    // Err: a subscriber is already installed, e.g. by an embedding binary
    if installed.is_ok() {
        let _ = LOG_GUARD.set(guard);
        tracing::debug!(logs_dir = %logs_dir.display(), "Logging initialized");
    }
    Ok(())
}
