//! QEMU-backed controller.

use super::spawn::spawn_subprocess;
use super::{VmmController, VmmHandler};
use crate::console::ConsoleIo;
use crate::options::HypervisorOptions;
use crate::util::{is_process_alive, kill_process_tree};
use crate::vmm::{ExitInfo, InstanceSpec, VmInstance};
use fleetlite_shared::{FleetError, FleetResult};
use std::ffi::OsString;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;

/// Starts VMs with `qemu-system-*`, console on stdio.
#[derive(Debug, Clone)]
pub struct QemuController {
    options: HypervisorOptions,
}

impl QemuController {
    pub fn new(options: HypervisorOptions) -> Self {
        Self { options }
    }

    /// Command line for `spec`, without the binary.
    pub(crate) fn args(&self, spec: &InstanceSpec) -> Vec<OsString> {
        let net = &spec.network;
        let mut drive = OsString::from("file=");
        drive.push(spec.disk.as_os_str());
        drive.push(",if=virtio,format=qcow2");

        let mut args: Vec<OsString> = vec![
            "-nographic".into(),
            "-name".into(),
            net.hostname.clone().into(),
            "-smp".into(),
            self.options.cpus.to_string().into(),
            "-m".into(),
            self.options.memory_mib.to_string().into(),
        ];
        if self.options.kvm {
            args.extend(["-enable-kvm".into(), "-cpu".into(), "host".into()]);
        }
        args.extend([
            "-drive".into(),
            drive,
            "-netdev".into(),
            format!("tap,id=net0,ifname={},script=no,downscript=no", net.tap).into(),
            "-device".into(),
            format!("virtio-net-pci,netdev=net0,mac={}", net.mac).into(),
        ]);
        args.extend(self.options.extra_args.iter().map(OsString::from));
        args
    }
}

#[async_trait::async_trait]
impl VmmController for QemuController {
    async fn start(&self, spec: &InstanceSpec) -> FleetResult<VmInstance> {
        let index = spec.index;
        let mut child = spawn_subprocess(&self.options.binary, &self.args(spec))?;

        let pid = child
            .id()
            .ok_or_else(|| FleetError::Engine(format!("hypervisor for vm {} exited at spawn", index)))?;
        let missing = |stream: &str| FleetError::Internal(format!("hypervisor {} not piped", stream));
        let stdin = child.stdin.take().ok_or_else(|| missing("stdin"))?;
        let stdout = child.stdout.take().ok_or_else(|| missing("stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| missing("stderr"))?;

        tokio::spawn(forward_stderr(index, stderr));

        let (exit_tx, exit_rx) = watch::channel(None);
        tokio::spawn(async move {
            let info = match child.wait().await {
                Ok(status) => ExitInfo::from(status),
                Err(e) => {
                    tracing::warn!(vm = index, pid, error = %e, "Failed to wait for hypervisor");
                    ExitInfo {
                        code: None,
                        signal: None,
                    }
                }
            };
            tracing::info!(vm = index, pid, status = %info, "Hypervisor exited");
            let _ = exit_tx.send(Some(info));
        });

        tracing::info!(vm = index, pid, disk = %spec.disk.display(), "Started hypervisor");

        Ok(VmInstance {
            handler: Box::new(QemuHandler::new(index, pid, exit_rx)),
            console: ConsoleIo::new(stdout, stdin),
        })
    }
}

/// Forward hypervisor stderr to tracing, one event per line.
async fn forward_stderr(index: usize, stderr: impl AsyncRead + Unpin) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        tracing::warn!(target: "hypervisor", vm = index, "{}", line);
    }
}

/// Handler for a QEMU process started by [`QemuController`].
pub struct QemuHandler {
    index: usize,
    pid: u32,
    exit: watch::Receiver<Option<ExitInfo>>,
}

impl QemuHandler {
    pub(crate) fn new(index: usize, pid: u32, exit: watch::Receiver<Option<ExitInfo>>) -> Self {
        Self { index, pid, exit }
    }
}

impl VmmHandler for QemuHandler {
    fn stop(&mut self) -> FleetResult<()> {
        if self.exit.borrow().is_some() {
            return Ok(());
        }
        if !kill_process_tree(self.pid) {
            tracing::debug!(vm = self.index, pid = self.pid, "Hypervisor still exiting after kill");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.exit.borrow().is_none() && is_process_alive(self.pid)
    }

    fn pid(&self) -> u32 {
        self.pid
    }

    fn exit_watch(&self) -> watch::Receiver<Option<ExitInfo>> {
        self.exit.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NetworkPlan;
    use crate::options::NetworkOptions;
    use std::os::unix::fs::PermissionsExt;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn spec(index: usize) -> InstanceSpec {
        let plan = NetworkPlan::new(&NetworkOptions::default(), 2).unwrap();
        InstanceSpec {
            index,
            disk: PathBuf::from("/runs/a/vm-1/disk.qcow2"),
            network: plan.node(index).unwrap().clone(),
        }
    }

    #[test]
    fn test_args_wire_disk_and_tap() {
        let controller = QemuController::new(HypervisorOptions {
            extra_args: vec!["-no-reboot".into()],
            ..Default::default()
        });
        let args: Vec<String> = controller
            .args(&spec(1))
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();

        assert_eq!(args[0], "-nographic");
        assert!(args.contains(&"-enable-kvm".to_string()));
        assert!(args.contains(&"file=/runs/a/vm-1/disk.qcow2,if=virtio,format=qcow2".to_string()));
        assert!(args.contains(&"tap,id=net0,ifname=fleettap1,script=no,downscript=no".to_string()));
        assert!(args.contains(&"virtio-net-pci,netdev=net0,mac=52:54:00:12:34:11".to_string()));
        assert_eq!(args.last().unwrap(), "-no-reboot");
    }

    #[test]
    fn test_kvm_can_be_disabled() {
        let controller = QemuController::new(HypervisorOptions {
            kvm: false,
            ..Default::default()
        });
        let args = controller.args(&spec(0));
        assert!(!args.iter().any(|a| a == "-enable-kvm"));
    }

    /// Script that ignores its arguments and behaves like a console.
    fn fake_hypervisor(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("fake-qemu");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_exit_is_observed() {
        let dir = TempDir::new().unwrap();
        let controller = QemuController::new(HypervisorOptions {
            binary: fake_hypervisor(&dir, "printf 'host-0 login: '; echo oops >&2; exit 3"),
            ..Default::default()
        });

        let instance = controller.start(&spec(0)).await.unwrap();
        let mut exit = instance.handler.exit_watch();
        let info = *tokio::time::timeout(Duration::from_secs(5), exit.wait_for(|e| e.is_some()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.unwrap().code, Some(3));
        assert!(!instance.handler.is_running());
    }

    #[tokio::test]
    async fn test_stop_kills_running_hypervisor() {
        let dir = TempDir::new().unwrap();
        let controller = QemuController::new(HypervisorOptions {
            binary: fake_hypervisor(&dir, "sleep 30 & wait"),
            ..Default::default()
        });

        let mut instance = controller.start(&spec(0)).await.unwrap();
        assert!(instance.handler.is_running());
        let mut exit = instance.handler.exit_watch();

        instance.handler.stop().unwrap();
        tokio::time::timeout(Duration::from_secs(5), exit.wait_for(|e| e.is_some()))
            .await
            .unwrap()
            .unwrap();
        assert!(!is_process_alive(instance.handler.pid()));
        instance.handler.stop().unwrap();
    }
}
