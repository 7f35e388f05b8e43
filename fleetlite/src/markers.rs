//! Durable readiness/failure markers.
//!
//! One file per VM per state, created with create-new semantics so a marker is
//! never overwritten. A VM never has both markers: writing one while the other
//! exists is refused.
//!
//! Markers are a diagnostic and compatibility surface. The coordinator's
//! in-process barrier does not read them.

use chrono::{DateTime, Utc};
use fleetlite_shared::constants::markers;
use fleetlite_shared::{FleetError, FleetResult};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkerKind {
    Ready,
    Failed,
}

impl MarkerKind {
    fn suffix(self) -> &'static str {
        match self {
            MarkerKind::Ready => markers::READY_SUFFIX,
            MarkerKind::Failed => markers::FAILED_SUFFIX,
        }
    }

    fn other(self) -> Self {
        match self {
            MarkerKind::Ready => MarkerKind::Failed,
            MarkerKind::Failed => MarkerKind::Ready,
        }
    }
}

/// Body of a marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarkerRecord {
    pub index: usize,
    pub kind: MarkerKind,
    pub step: Option<String>,
    pub error: Option<String>,
    pub transcript: PathBuf,
    pub serial_log: PathBuf,
    pub at: DateTime<Utc>,
}

/// Barrier verdict computed from marker files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierState {
    Ready,
    Failed(Vec<usize>),
    Pending(Vec<usize>),
}

#[derive(Debug, Clone)]
pub struct MarkerStore {
    dir: PathBuf,
}

impl MarkerStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, index: usize, kind: MarkerKind) -> PathBuf {
        self.dir.join(format!("vm-{}.{}", index, kind.suffix()))
    }

    /// Write a marker for `record.index`.
    ///
    /// Fails with `InvalidState` if this marker or the opposite one exists.
    pub fn write(&self, record: &MarkerRecord) -> FleetResult<PathBuf> {
        let index = record.index;
        let opposite = self.path(index, record.kind.other());
        if opposite.exists() {
            return Err(FleetError::InvalidState(format!(
                "vm {} already has marker {}",
                index,
                opposite.display()
            )));
        }

        let path = self.path(index, record.kind);
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => FleetError::InvalidState(format!(
                    "marker {} already written",
                    path.display()
                )),
                _ => FleetError::Storage(format!(
                    "Failed to create marker {}: {}",
                    path.display(),
                    e
                )),
            })?;
        serde_json::to_writer_pretty(&mut file, record)?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        tracing::debug!(vm = index, kind = ?record.kind, path = %path.display(), "Wrote marker");
        Ok(path)
    }

    /// Current marker of a VM, if any.
    pub fn read(&self, index: usize) -> FleetResult<Option<MarkerRecord>> {
        for kind in [MarkerKind::Failed, MarkerKind::Ready] {
            let path = self.path(index, kind);
            match std::fs::read_to_string(&path) {
                Ok(raw) => return Ok(Some(serde_json::from_str(&raw)?)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Evaluate the readiness predicate for VMs `0..count`.
    ///
    /// Ready iff every index has a readiness marker and none has a failure
    /// marker.
    pub fn barrier(&self, count: usize) -> BarrierState {
        let mut failed = Vec::new();
        let mut pending = Vec::new();
        for index in 0..count {
            if self.path(index, MarkerKind::Failed).exists() {
                failed.push(index);
            } else if !self.path(index, MarkerKind::Ready).exists() {
                pending.push(index);
            }
        }
        if !failed.is_empty() {
            BarrierState::Failed(failed)
        } else if !pending.is_empty() {
            BarrierState::Pending(pending)
        } else {
            BarrierState::Ready
        }
    }
}
