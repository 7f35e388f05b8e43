//! Scripted `GuestExec` that answers like kubeadm/kubectl would.

use super::exec::{CommandOutput, GuestExec};
use crate::vmm::fake::FakeVmm;
use async_trait::async_trait;
use fleetlite_shared::FleetResult;
use parking_lot::Mutex;
use std::net::Ipv4Addr;
use std::sync::Arc;

#[derive(Clone)]
pub struct FakeExec {
    calls: Arc<Mutex<Vec<(usize, String)>>>,
    joins: Arc<Mutex<usize>>,
    init_output: String,
    ready_cap: Option<usize>,
    fail_on: Option<(usize, &'static str)>,
    hang_on: Option<&'static str>,
    vmm: Option<FakeVmm>,
}

impl FakeExec {
    pub const TOKEN: &'static str = "abcdef.0123456789abcdef";

    pub fn new() -> Self {
        Self {
            calls: Arc::default(),
            joins: Arc::default(),
            init_output: format!(
                "Your Kubernetes control-plane has initialized successfully!\n\n\
                 kubeadm join 192.168.7.2:6443 --token {} \\\n    \
                 --discovery-token-ca-cert-hash sha256:0f3c\n",
                Self::TOKEN
            ),
            ready_cap: None,
            fail_on: None,
            hang_on: None,
            vmm: None,
        }
    }

    pub fn with_init_output(mut self, output: &str) -> Self {
        self.init_output = output.to_string();
        self
    }

    /// Never report more than `cap` nodes Ready.
    pub fn cap_ready_nodes(mut self, cap: usize) -> Self {
        self.ready_cap = Some(cap);
        self
    }

    /// Fail commands on VM `index` containing `pattern`.
    pub fn fail_on(mut self, index: usize, pattern: &'static str) -> Self {
        self.fail_on = Some((index, pattern));
        self
    }

    /// Never return from commands containing `pattern`.
    pub fn hang_on(mut self, pattern: &'static str) -> Self {
        self.hang_on = Some(pattern);
        self
    }

    /// Power off the matching fake VM when asked to shut down.
    pub fn powering_off(mut self, vmm: &FakeVmm) -> Self {
        self.vmm = Some(vmm.clone());
        self
    }

    pub fn calls(&self) -> Vec<(usize, String)> {
        self.calls.lock().clone()
    }

    pub fn calls_matching(&self, pattern: &str) -> Vec<(usize, String)> {
        self.calls()
            .into_iter()
            .filter(|(_, command)| command.contains(pattern))
            .collect()
    }

    pub fn count_matching(&self, index: usize, pattern: &str) -> usize {
        self.calls_matching(pattern)
            .iter()
            .filter(|(i, _)| *i == index)
            .count()
    }

    fn node_status(&self) -> String {
        let mut ready = *self.joins.lock() + 1;
        if let Some(cap) = self.ready_cap {
            ready = ready.min(cap);
        }
        (0..ready)
            .map(|i| format!("host-{}   Ready   <none>   1m   v1.28.2\n", i))
            .collect()
    }
}

impl Default for FakeExec {
    fn default() -> Self {
        Self::new()
    }
}

fn ok(stdout: impl Into<String>) -> CommandOutput {
    CommandOutput {
        stdout: stdout.into(),
        ..Default::default()
    }
}

#[async_trait]
impl GuestExec for FakeExec {
    async fn exec(
        &self,
        index: usize,
        _address: Ipv4Addr,
        command: &str,
    ) -> FleetResult<CommandOutput> {
        self.calls.lock().push((index, command.to_string()));

        if self.hang_on.is_some_and(|pattern| command.contains(pattern)) {
            std::future::pending::<()>().await;
        }

        if let Some((failing, pattern)) = self.fail_on {
            if failing == index && command.contains(pattern) {
                return Ok(CommandOutput {
                    stdout: String::new(),
                    stderr: format!("error running: {}\n", command),
                    status: 1,
                });
            }
        }

        let output = if command.contains("kubeadm init") {
            ok(self.init_output.clone())
        } else if command.contains("kubeadm join") {
            *self.joins.lock() += 1;
            ok("This node has joined the cluster\n")
        } else if command.contains("kubectl get nodes") {
            ok(self.node_status())
        } else if command.contains("admin.conf") && command.starts_with("cat") {
            ok("apiVersion: v1\nkind: Config\nclusters: []\n")
        } else if command.contains("poweroff") {
            if let Some(vmm) = &self.vmm {
                vmm.power_off(index);
            }
            CommandOutput {
                status: 255,
                ..Default::default()
            }
        } else {
            ok("")
        };
        Ok(output)
    }
}
