//! Error taxonomy for fleet provisioning and cluster assembly.

use crate::constants::exit_codes;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

pub type FleetResult<T> = Result<T, FleetError>;

#[derive(Debug, Error)]
pub enum FleetError {
    /// A console wait exceeded its bound.
    #[error("timed out after {timeout:?} waiting for {pattern:?}")]
    Timeout { pattern: String, timeout: Duration },

    /// The console stream hit EOF, usually because the VM process exited.
    #[error("console stream closed during {during}")]
    StreamClosed { during: String },

    /// A scripted command reported failure through its console marker.
    #[error("guest reported failure for {command:?}")]
    StepFailed { command: String },

    #[error("provisioning step '{step}' failed: {source}")]
    ProvisioningFailed {
        step: String,
        #[source]
        source: Box<FleetError>,
    },

    /// Failure of one VM, with the phase it was in and where to look.
    #[error("vm {index} failed while {phase}: {source} (transcript: {})", transcript.display())]
    Vm {
        index: usize,
        phase: String,
        transcript: PathBuf,
        #[source]
        source: Box<FleetError>,
    },

    #[error("fleet not ready before timeout; still pending: {pending:?}")]
    FleetTimeout { pending: Vec<usize> },

    #[error("cluster not ready: {ready}/{expected} nodes ready before timeout")]
    ClusterNotReady { ready: usize, expected: usize },

    #[error("join token not found in cluster-init output")]
    TokenNotFound,

    #[error("command on vm {index} exited with status {status}: {command}: {stderr}")]
    CommandFailed {
        index: usize,
        command: String,
        status: i32,
        stderr: String,
    },

    /// A guest command did not return within its bound.
    #[error("command on vm {index} did not finish within {timeout:?}: {command}")]
    CommandTimeout {
        index: usize,
        command: String,
        timeout: Duration,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error("interrupted")]
    Interrupted,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("hypervisor error: {0}")]
    Engine(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl FleetError {
    /// Wrap a script-level error with the step that produced it.
    pub fn provisioning(step: impl Into<String>, source: FleetError) -> Self {
        FleetError::ProvisioningFailed {
            step: step.into(),
            source: Box::new(source),
        }
    }

    /// Index of the VM this error is about, if any.
    pub fn vm_index(&self) -> Option<usize> {
        match self {
            FleetError::Vm { index, .. }
            | FleetError::CommandFailed { index, .. }
            | FleetError::CommandTimeout { index, .. } => Some(*index),
            _ => None,
        }
    }

    /// Name of the provisioning step that failed, looking through VM wrappers.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            FleetError::ProvisioningFailed { step, .. } => Some(step),
            FleetError::Vm { source, .. } => source.failed_step(),
            _ => None,
        }
    }

    /// Innermost cause, skipping VM and step wrappers.
    pub fn root_cause(&self) -> &FleetError {
        match self {
            FleetError::ProvisioningFailed { source, .. } | FleetError::Vm { source, .. } => {
                source.root_cause()
            }
            other => other,
        }
    }

    /// Process exit code for the `fleetlite` binary.
    ///
    /// Provisioning failures, barrier/cluster timeouts and cluster assembly
    /// failures each get their own code.
    pub fn exit_code(&self) -> i32 {
        match self {
            FleetError::Vm { .. }
            | FleetError::ProvisioningFailed { .. }
            | FleetError::StreamClosed { .. }
            | FleetError::StepFailed { .. }
            | FleetError::Timeout { .. } => exit_codes::PROVISIONING,
            FleetError::FleetTimeout { .. } | FleetError::ClusterNotReady { .. } => {
                exit_codes::TIMEOUT
            }
            FleetError::TokenNotFound
            | FleetError::CommandFailed { .. }
            | FleetError::CommandTimeout { .. } => exit_codes::ASSEMBLY,
            FleetError::Interrupted | FleetError::Cancelled => exit_codes::INTERRUPTED,
            _ => exit_codes::GENERAL,
        }
    }
}
