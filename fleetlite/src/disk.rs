//! Per-VM copy-on-write disks.
//!
//! Every VM boots from a qcow2 overlay backed by the shared base image. The
//! base image is only ever opened read-only through the backing chain.

use crate::options::HypervisorOptions;
use fleetlite_shared::{FleetError, FleetResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

/// Create `overlay` as a qcow2 image backed by `base`.
///
/// Runs `<img_tool> create -f qcow2 -F <base_format> -b <base> <overlay>`.
/// An existing overlay from an earlier run is replaced.
pub async fn create_overlay(
    options: &HypervisorOptions,
    base: &Path,
    overlay: &Path,
) -> FleetResult<PathBuf> {
    let base = std::fs::canonicalize(base).map_err(|e| {
        FleetError::Storage(format!("base image {} unavailable: {}", base.display(), e))
    })?;
    if overlay.exists() {
        std::fs::remove_file(overlay)?;
    }

    let output = Command::new(&options.img_tool)
        .arg("create")
        .args(["-f", "qcow2"])
        .args(["-F", options.base_format.as_str()])
        .arg("-b")
        .arg(&base)
        .arg(overlay)
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| {
            FleetError::Storage(format!(
                "failed to run {}: {}",
                options.img_tool.display(),
                e
            ))
        })?;

    if !output.status.success() {
        return Err(FleetError::Storage(format!(
            "{} create failed for {} ({}): {}",
            options.img_tool.display(),
            overlay.display(),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    tracing::debug!(
        base = %base.display(),
        overlay = %overlay.display(),
        "Created disk overlay"
    );
    Ok(overlay.to_path_buf())
}
