//! Append-only console logs kept for postmortem.
//!
//! - `SerialLog`: raw bytes exactly as read from the console.
//! - `ConsoleTranscript`: one timestamped line per send/expect/match event.
//!
//! Neither is read back for control decisions. Write errors are logged once
//! and then ignored, since a full disk must not fail provisioning.

use chrono::{SecondsFormat, Utc};
use fleetlite_shared::{FleetError, FleetResult};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

fn open_append(path: &Path) -> FleetResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| FleetError::Storage(format!("Failed to open {}: {}", path.display(), e)))
}

#[derive(Debug)]
pub struct SerialLog {
    path: PathBuf,
    file: File,
    failed: bool,
}

impl SerialLog {
    pub fn open(path: impl Into<PathBuf>) -> FleetResult<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&mut self, bytes: &[u8]) {
        if self.failed {
            return;
        }
        if let Err(e) = self.file.write_all(bytes) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write serial log");
            self.failed = true;
        }
    }
}

#[derive(Debug)]
pub struct ConsoleTranscript {
    path: PathBuf,
    file: File,
    failed: bool,
}

impl ConsoleTranscript {
    pub fn open(path: impl Into<PathBuf>) -> FleetResult<Self> {
        let path = path.into();
        let file = open_append(&path)?;
        Ok(Self {
            path,
            file,
            failed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event line: `<timestamp> <kind> <detail>`.
    pub fn record(&mut self, kind: &str, detail: &str) {
        if self.failed {
            return;
        }
        let line = format!(
            "{} {:<8} {}\n",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            kind,
            detail
        );
        if let Err(e) = self.file.write_all(line.as_bytes()) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to write transcript");
            self.failed = true;
        }
    }
}
