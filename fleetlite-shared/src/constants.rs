//! Fixed names used on the filesystem and console boundaries.

/// Marker file names, one per VM per state.
pub mod markers {
    /// Directory (under the run directory) holding marker files.
    pub const DIR: &str = "markers";
    /// Suffix of the readiness marker: `vm-<i>.running`.
    pub const READY_SUFFIX: &str = "running";
    /// Suffix of the failure marker: `vm-<i>.terminated`.
    pub const FAILED_SUFFIX: &str = "terminated";
}

/// Per-VM file names inside `vm-<i>/`.
pub mod files {
    pub const DISK: &str = "disk.qcow2";
    pub const SERIAL_LOG: &str = "serial.log";
    pub const TRANSCRIPT: &str = "console.transcript";
    pub const KUBECONFIG: &str = "kube.config";
    pub const LOGS_DIR: &str = "logs";
    pub const LOG_FILE_PREFIX: &str = "fleetlite.log";
}

/// Console step markers.
///
/// The guest echoes `<PREFIX><step><OK_SUFFIX>` after a command succeeds.
pub mod console {
    pub const MARKER_PREFIX: &str = "@@fleet:";
    pub const OK_SUFFIX: &str = ":ok@@";
    pub const FAILED_SUFFIX: &str = ":failed@@";
}

/// Process exit codes reported by the `fleetlite` binary.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const PROVISIONING: i32 = 2;
    pub const TIMEOUT: i32 = 3;
    pub const ASSEMBLY: i32 = 4;
    pub const INTERRUPTED: i32 = 130;
}
