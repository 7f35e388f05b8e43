//! Per-run filesystem layout.
//!
//! ```text
//! <run>/
//! ├── logs/fleetlite.log.<date>
//! ├── markers/vm-<i>.running | vm-<i>.terminated
//! ├── kube.config
//! └── vm-<i>/
//!     ├── disk.qcow2
//!     ├── serial.log
//!     └── console.transcript
//! ```
//!
//! The run directory is the only persisted state and may be deleted
//! between runs.

use fleetlite_shared::constants::{files, markers};
use fleetlite_shared::{FleetError, FleetResult};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct FleetLayout {
    run_dir: PathBuf,
}

impl FleetLayout {
    pub fn new(run_dir: impl Into<PathBuf>) -> Self {
        Self {
            run_dir: run_dir.into(),
        }
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.run_dir.join(files::LOGS_DIR)
    }

    pub fn markers_dir(&self) -> PathBuf {
        self.run_dir.join(markers::DIR)
    }

    pub fn kubeconfig_path(&self) -> PathBuf {
        self.run_dir.join(files::KUBECONFIG)
    }

    pub fn vm(&self, index: usize) -> VmLayout {
        VmLayout {
            index,
            dir: self.run_dir.join(format!("vm-{}", index)),
        }
    }

    /// Create the run directory and clear markers left by an earlier run.
    pub fn prepare(&self) -> FleetResult<()> {
        let markers_dir = self.markers_dir();
        if markers_dir.exists() {
            std::fs::remove_dir_all(&markers_dir).map_err(|e| {
                FleetError::Storage(format!(
                    "Failed to clear stale markers at {}: {}",
                    markers_dir.display(),
                    e
                ))
            })?;
        }
        for dir in [self.run_dir.clone(), self.logs_dir(), markers_dir] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                FleetError::Storage(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }

    /// Remove the whole run directory.
    pub fn cleanup(&self) -> FleetResult<()> {
        if self.run_dir.exists() {
            std::fs::remove_dir_all(&self.run_dir)?;
        }
        Ok(())
    }
}

/// Files of one VM.
#[derive(Debug, Clone)]
pub struct VmLayout {
    index: usize,
    dir: PathBuf,
}

impl VmLayout {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn disk_path(&self) -> PathBuf {
        self.dir.join(files::DISK)
    }

    pub fn serial_log_path(&self) -> PathBuf {
        self.dir.join(files::SERIAL_LOG)
    }

    pub fn transcript_path(&self) -> PathBuf {
        self.dir.join(files::TRANSCRIPT)
    }

    pub fn prepare(&self) -> FleetResult<()> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            FleetError::Storage(format!("Failed to create {}: {}", self.dir.display(), e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prepare_clears_stale_markers_only() {
        let temp = TempDir::new().unwrap();
        let layout = FleetLayout::new(temp.path().join("run"));
        layout.prepare().unwrap();

        let vm = layout.vm(1);
        vm.prepare().unwrap();
        std::fs::write(vm.serial_log_path(), b"old boot").unwrap();
        std::fs::write(layout.markers_dir().join("vm-1.running"), b"{}").unwrap();

        layout.prepare().unwrap();

        assert!(layout.markers_dir().is_dir());
        assert!(!layout.markers_dir().join("vm-1.running").exists());
        assert!(vm.serial_log_path().exists());
    }

    #[test]
    fn test_vm_paths() {
        let layout = FleetLayout::new("/runs/a");
        let vm = layout.vm(2);
        assert_eq!(vm.disk_path(), PathBuf::from("/runs/a/vm-2/disk.qcow2"));
        assert_eq!(
            vm.transcript_path(),
            PathBuf::from("/runs/a/vm-2/console.transcript")
        );
        assert_eq!(layout.kubeconfig_path(), PathBuf::from("/runs/a/kube.config"));
    }
}
