//! Subprocess spawning for hypervisor binaries.

use fleetlite_shared::{FleetError, FleetResult};
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};

/// Spawns a hypervisor with piped stdio for the serial console.
///
/// The child leads its own process group so the whole tree can be signalled
/// at once, and is killed if its handle is dropped.
///
/// # Arguments
/// * `binary_path` - Hypervisor binary
/// * `args` - Full argument list
///
/// # Returns
/// * `Ok(Child)` - Spawned process with stdin, stdout and stderr piped
/// * `Err(...)` - Failed to spawn subprocess
pub(crate) fn spawn_subprocess(binary_path: &Path, args: &[OsString]) -> FleetResult<Child> {
    let mut cmd = Command::new(binary_path);
    cmd.args(args);

    // Pass RUST_LOG to subprocess if set
    if let Ok(rust_log) = std::env::var("RUST_LOG") {
        cmd.env("RUST_LOG", rust_log);
    }

    // stdin/stdout carry the serial console, stderr is forwarded to tracing
    cmd.stdin(Stdio::piped());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.process_group(0);
    cmd.kill_on_drop(true);

    cmd.spawn().map_err(|e| {
        let err_msg = format!(
            "Failed to spawn hypervisor at {}: {}",
            binary_path.display(),
            e
        );
        tracing::error!("{}", err_msg);
        FleetError::Engine(err_msg)
    })
}
