//! VM lifecycle state machine.
//!
//! ```text
//! Starting → Booting → Configuring → Ready → Stopped
//!     └─────────┴────────────┴─────────┴──→ Failed
//! ```
//!
//! A VM cancelled before it is ready goes straight to `Stopped`.

use super::VmEvent;
use fleetlite_shared::{FleetError, FleetResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VmState {
    Starting,
    Booting,
    Configuring,
    Ready,
    Failed,
    Stopped,
}

impl VmState {
    pub fn is_terminal(self) -> bool {
        matches!(self, VmState::Failed | VmState::Stopped)
    }

    pub fn can_transition_to(self, next: VmState) -> bool {
        use VmState::*;
        match (self, next) {
            (Starting, Booting) | (Booting, Configuring) | (Configuring, Ready) => true,
            (from, Failed) | (from, Stopped) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VmState::Starting => "starting",
            VmState::Booting => "booting",
            VmState::Configuring => "configuring",
            VmState::Ready => "ready",
            VmState::Failed => "failed",
            VmState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current state of one VM, shared between its supervisor and pipeline tasks.
///
/// Every accepted transition except `Failed` is published as a
/// [`VmEvent::StateChanged`]. Failures are published by the supervisor
/// together with their error.
#[derive(Debug, Clone)]
pub struct StateTracker {
    index: usize,
    state: Arc<Mutex<VmState>>,
    events: mpsc::UnboundedSender<VmEvent>,
}

impl StateTracker {
    pub fn new(index: usize, events: mpsc::UnboundedSender<VmEvent>) -> Self {
        Self {
            index,
            state: Arc::new(Mutex::new(VmState::Starting)),
            events,
        }
    }

    pub fn get(&self) -> VmState {
        *self.state.lock()
    }

    pub fn set(&self, next: VmState) -> FleetResult<()> {
        {
            let mut state = self.state.lock();
            if !state.can_transition_to(next) {
                return Err(FleetError::InvalidState(format!(
                    "vm {}: {} -> {}",
                    self.index, *state, next
                )));
            }
            *state = next;
        }

        tracing::debug!(vm = self.index, state = %next, "VM state changed");
        if next != VmState::Failed {
            // The coordinator may already be gone during teardown
            let _ = self.events.send(VmEvent::StateChanged {
                index: self.index,
                state: next,
            });
        }
        Ok(())
    }
}
