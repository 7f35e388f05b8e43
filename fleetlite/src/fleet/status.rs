//! In-process status table fed by supervisor events.

use crate::markers::BarrierState;
use crate::supervisor::{VmEvent, VmState};
use serde::Serialize;

/// One row of the status table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VmStatus {
    pub index: usize,
    pub state: VmState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct StatusTable {
    rows: Vec<VmStatus>,
}

impl StatusTable {
    pub fn new(count: usize) -> Self {
        Self {
            rows: (0..count)
                .map(|index| VmStatus {
                    index,
                    state: VmState::Starting,
                    error: None,
                })
                .collect(),
        }
    }

    /// Fold one event into the table.
    ///
    /// Transitions the state machine does not allow are ignored.
    pub fn apply(&mut self, event: &VmEvent) {
        let Some(row) = self.rows.get_mut(event.index()) else {
            tracing::warn!(vm = event.index(), "Event for unknown VM");
            return;
        };
        let next = match event {
            VmEvent::StateChanged { state, .. } => *state,
            VmEvent::Failed { .. } => VmState::Failed,
        };
        if !row.state.can_transition_to(next) {
            tracing::debug!(vm = row.index, from = %row.state, to = %next, "Ignoring stale event");
            return;
        }
        row.state = next;
        if let VmEvent::Failed { error, .. } = event {
            row.error = Some(error.to_string());
        }
    }

    /// Readiness predicate: every VM Ready, none Failed.
    pub fn barrier(&self) -> BarrierState {
        let failed: Vec<usize> = self
            .rows
            .iter()
            .filter(|row| row.state == VmState::Failed)
            .map(|row| row.index)
            .collect();
        if !failed.is_empty() {
            return BarrierState::Failed(failed);
        }
        let pending = self.pending();
        if pending.is_empty() {
            BarrierState::Ready
        } else {
            BarrierState::Pending(pending)
        }
    }

    /// Indices not yet Ready.
    pub fn pending(&self) -> Vec<usize> {
        self.rows
            .iter()
            .filter(|row| row.state != VmState::Ready)
            .map(|row| row.index)
            .collect()
    }

    pub fn rows(&self) -> &[VmStatus] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetlite_shared::FleetError;

    fn changed(index: usize, state: VmState) -> VmEvent {
        VmEvent::StateChanged { index, state }
    }

    #[test]
    fn test_barrier_requires_every_vm_ready() {
        let mut table = StatusTable::new(2);
        assert_eq!(table.barrier(), BarrierState::Pending(vec![0, 1]));

        for state in [VmState::Booting, VmState::Configuring, VmState::Ready] {
            table.apply(&changed(0, state));
        }
        assert_eq!(table.barrier(), BarrierState::Pending(vec![1]));

        for state in [VmState::Booting, VmState::Configuring, VmState::Ready] {
            table.apply(&changed(1, state));
        }
        assert_eq!(table.barrier(), BarrierState::Ready);
    }

    #[test]
    fn test_failure_wins_over_pending() {
        let mut table = StatusTable::new(3);
        table.apply(&VmEvent::Failed {
            index: 2,
            error: FleetError::StreamClosed {
                during: "login".into(),
            },
        });

        assert_eq!(table.barrier(), BarrierState::Failed(vec![2]));
        assert_eq!(table.rows()[2].state, VmState::Failed);
        assert!(table.rows()[2].error.as_deref().unwrap().contains("login"));
    }

    #[test]
    fn test_backward_and_unknown_events_are_ignored() {
        let mut table = StatusTable::new(1);
        table.apply(&changed(0, VmState::Booting));
        table.apply(&changed(0, VmState::Starting));
        table.apply(&changed(5, VmState::Ready));

        assert_eq!(table.rows()[0].state, VmState::Booting);
        assert_eq!(table.len(), 1);
    }
}
