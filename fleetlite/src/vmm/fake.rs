//! In-process stand-in for a hypervisor.
//!
//! Each VM is a real `sleep` process (so PIDs, process groups and kills behave
//! like the real thing) plus a scripted guest talking over a duplex console.
//! When the process dies the console closes.

use super::controller::{QemuHandler, VmmController, spawn_subprocess};
use super::{ExitInfo, InstanceSpec, VmInstance};
use crate::console::ConsoleIo;
use crate::provision::step_markers;
use crate::util::{is_process_alive, kill_process};
use fleetlite_shared::{FleetError, FleetResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, duplex};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuestBehavior {
    Healthy,
    /// Report failure for the named run step.
    FailAt(&'static str),
    /// Power off right after the login name is typed.
    Crash,
    /// Never print anything.
    Silent,
}

#[derive(Clone, Default)]
pub struct FakeVmm {
    behaviors: HashMap<usize, GuestBehavior>,
    boot_delays: HashMap<usize, Duration>,
    started: Arc<Mutex<HashMap<usize, u32>>>,
}

impl FakeVmm {
    pub fn healthy() -> Self {
        Self::default()
    }

    pub fn with(mut self, index: usize, behavior: GuestBehavior) -> Self {
        self.behaviors.insert(index, behavior);
        self
    }

    pub fn with_boot_delay(mut self, index: usize, delay: Duration) -> Self {
        self.boot_delays.insert(index, delay);
        self
    }

    /// PIDs of every VM started so far.
    pub fn pids(&self) -> Vec<u32> {
        self.started.lock().values().copied().collect()
    }

    pub fn start_count(&self) -> usize {
        self.started.lock().len()
    }

    /// Number of started VMs whose process is still alive.
    pub fn live_count(&self) -> usize {
        self.pids().into_iter().filter(|&pid| is_process_alive(pid)).count()
    }

    /// Wait until no started VM process is alive; false on timeout.
    pub async fn wait_all_exited(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.live_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }

    /// Simulate a guest-initiated poweroff.
    pub fn power_off(&self, index: usize) {
        if let Some(&pid) = self.started.lock().get(&index) {
            kill_process(pid);
        }
    }
}

#[async_trait::async_trait]
impl VmmController for FakeVmm {
    async fn start(&self, spec: &InstanceSpec) -> FleetResult<VmInstance> {
        let index = spec.index;
        let behavior = self
            .behaviors
            .get(&index)
            .copied()
            .unwrap_or(GuestBehavior::Healthy);
        let boot_delay = self.boot_delays.get(&index).copied().unwrap_or_default();

        let mut child = spawn_subprocess(Path::new("sleep"), &["3600".into()])?;
        let pid = child
            .id()
            .ok_or_else(|| FleetError::Engine("fake hypervisor exited at spawn".into()))?;
        self.started.lock().insert(index, pid);

        let (host, guest) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(host);
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(async move {
            let guest = run_guest(index, behavior, boot_delay, guest, pid);
            tokio::pin!(guest);
            let mut guest_done = false;
            let status = loop {
                tokio::select! {
                    status = child.wait() => break status,
                    _ = &mut guest, if !guest_done => guest_done = true,
                }
            };
            let info = status.map(ExitInfo::from).unwrap_or(ExitInfo {
                code: None,
                signal: None,
            });
            let _ = exit_tx.send(Some(info));
        });

        Ok(VmInstance {
            handler: Box::new(QemuHandler::new(index, pid, exit_rx)),
            console: ConsoleIo::new(reader, writer),
        })
    }
}

/// Name of the run step whose completion marker is embedded in `line`.
fn marker_step(line: &str) -> Option<&str> {
    let start = line.find("'@@fleet:")? + "'@@fleet:".len();
    let rest = &line[start..];
    Some(&rest[..rest.find('\'')?])
}

async fn run_guest(
    index: usize,
    behavior: GuestBehavior,
    boot_delay: Duration,
    stream: DuplexStream,
    pid: u32,
) {
    if behavior == GuestBehavior::Silent {
        std::future::pending::<()>().await;
    }
    tokio::time::sleep(boot_delay).await;

    let (read, mut write) = tokio::io::split(stream);
    let mut lines = BufReader::new(read).lines();

    let banner = format!("Booting fake guest {}\r\n\r\nhost-{} login: ", index, index);
    let _ = write.write_all(banner.as_bytes()).await;
    if !matches!(lines.next_line().await, Ok(Some(_))) {
        return;
    }
    if behavior == GuestBehavior::Crash {
        kill_process(pid);
        std::future::pending::<()>().await;
    }

    for prompt in ["New password: ", "Retype new password: "] {
        let _ = write.write_all(prompt.as_bytes()).await;
        if !matches!(lines.next_line().await, Ok(Some(_))) {
            return;
        }
    }
    let _ = write.write_all(b"\r\n# ").await;

    while let Ok(Some(line)) = lines.next_line().await {
        let _ = write.write_all(format!("{}\r\n", line).as_bytes()).await;
        let Some(step) = marker_step(&line) else {
            let _ = write.write_all(b"# ").await;
            continue;
        };
        let (ok, failed) = step_markers(step);
        let marker = match behavior {
            GuestBehavior::FailAt(failing) if failing == step => failed,
            _ => ok,
        };
        let _ = write.write_all(format!("{}\r\n# ", marker).as_bytes()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkPlan;
    use crate::options::NetworkOptions;
    use std::path::PathBuf;

    #[test]
    fn test_marker_step_parses_typed_line() {
        assert_eq!(
            marker_step("sh -ec 'swapoff -a' && echo '@@fleet:disable-swap'':ok@@' || echo x"),
            Some("disable-swap")
        );
        assert_eq!(marker_step("@@fleet:disable-swap:ok@@"), None);
    }

    #[tokio::test]
    async fn test_power_off_closes_console() {
        let vmm = FakeVmm::healthy().with(0, GuestBehavior::Silent);
        let plan = NetworkPlan::new(&NetworkOptions::default(), 1).unwrap();
        let spec = InstanceSpec {
            index: 0,
            disk: PathBuf::from("disk.qcow2"),
            network: plan.node(0).unwrap().clone(),
        };

        let instance = vmm.start(&spec).await.unwrap();
        let mut exit = instance.handler.exit_watch();
        assert_eq!(vmm.live_count(), 1);

        vmm.power_off(0);
        tokio::time::timeout(Duration::from_secs(5), exit.wait_for(|e| e.is_some()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(vmm.live_count(), 0);
    }
}
