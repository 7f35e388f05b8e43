use crate::util::kill_process_tree;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// PIDs of live hypervisor processes, keyed by VM index.
///
/// Supervisors register a PID right after spawn and remove it once the
/// process is gone. Whatever is left is killed by `kill_all`, which is safe
/// to call from `Drop`.
#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    pids: Arc<Mutex<HashMap<usize, u32>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, index: usize, pid: u32) {
        self.pids.lock().insert(index, pid);
    }

    pub fn unregister(&self, index: usize) -> Option<u32> {
        self.pids.lock().remove(&index)
    }

    pub fn pids(&self) -> Vec<(usize, u32)> {
        let mut pids: Vec<_> = self.pids.lock().iter().map(|(&i, &p)| (i, p)).collect();
        pids.sort_unstable();
        pids
    }

    pub fn is_empty(&self) -> bool {
        self.pids.lock().is_empty()
    }

    /// Kill every registered process tree and clear the registry.
    ///
    /// Returns the number of entries that were still registered.
    pub fn kill_all(&self) -> usize {
        let drained: Vec<(usize, u32)> = self.pids.lock().drain().collect();
        for &(index, pid) in &drained {
            tracing::warn!(vm = index, pid, "Killing leftover hypervisor");
            kill_process_tree(pid);
        }
        drained.len()
    }
}
