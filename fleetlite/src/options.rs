//! Fleet configuration.
//!
//! Options are loaded from an optional JSON file and then overridden by CLI
//! flags. Every section has defaults, so `{}` is a valid config file.

use fleetlite_shared::{FleetError, FleetResult};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level options for one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FleetOptions {
    /// Number of VMs; index 0 becomes the cluster master.
    pub nodes: usize,
    /// Shared base disk image. Never written; each VM gets a COW overlay.
    pub base_image: PathBuf,
    /// Per-run working directory (disks, logs, markers).
    pub work_dir: PathBuf,
    /// How often the readiness barrier is re-evaluated.
    pub poll_interval_ms: u64,
    /// Upper bound for the whole fleet to become ready.
    pub ready_timeout_secs: u64,
    /// Grace period for supervisors to tear down on cancel.
    pub cancel_grace_secs: u64,
    /// Upper bound for VM processes to exit after the shutdown command.
    pub shutdown_timeout_secs: u64,
    /// Keep the cluster up after assembly until interrupted.
    pub keep_running: bool,
    pub hypervisor: HypervisorOptions,
    pub network: NetworkOptions,
    pub credentials: Credentials,
    pub provision: ProvisionOptions,
    pub cluster: ClusterOptions,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            nodes: 3,
            base_image: PathBuf::new(),
            work_dir: default_work_dir(),
            poll_interval_ms: 1000,
            ready_timeout_secs: 1800,
            cancel_grace_secs: 10,
            shutdown_timeout_secs: 120,
            keep_running: false,
            hypervisor: HypervisorOptions::default(),
            network: NetworkOptions::default(),
            credentials: Credentials::default(),
            provision: ProvisionOptions::default(),
            cluster: ClusterOptions::default(),
        }
    }
}

/// `~/.fleetlite/runs/<ulid>`, falling back to the temp dir.
fn default_work_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".fleetlite")
        .join("runs")
        .join(ulid::Ulid::new().to_string())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HypervisorOptions {
    pub binary: PathBuf,
    /// Tool used to create COW overlays (`qemu-img`).
    pub img_tool: PathBuf,
    /// Format of the base image, passed as the overlay's backing format.
    pub base_format: String,
    pub cpus: u8,
    pub memory_mib: u32,
    pub kvm: bool,
    pub extra_args: Vec<String>,
}

impl Default for HypervisorOptions {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("qemu-system-x86_64"),
            img_tool: PathBuf::from("qemu-img"),
            base_format: "qcow2".to_string(),
            cpus: 2,
            memory_mib: 2048,
            kvm: true,
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkOptions {
    /// First address of the /24 the fleet is carved from.
    pub base_address: Ipv4Addr,
    pub tap_prefix: String,
    pub hostname_prefix: String,
    pub dns: Ipv4Addr,
    /// Guest network interface configured by the script.
    pub guest_interface: String,
}

impl Default for NetworkOptions {
    fn default() -> Self {
        Self {
            base_address: Ipv4Addr::new(192, 168, 7, 0),
            tap_prefix: "fleettap".to_string(),
            hostname_prefix: "host".to_string(),
            dns: Ipv4Addr::new(8, 8, 8, 8),
            guest_interface: "eth0".to_string(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub user: String,
    /// Password set on first login.
    pub root_password: String,
    /// Public key file installed into the guest's authorized_keys.
    pub ssh_public_key: Option<PathBuf>,
    /// Inline public key; filled from `ssh_public_key` by `load_keys`.
    pub authorized_key: Option<String>,
    /// Private key used for guest command execution.
    pub ssh_private_key: Option<PathBuf>,
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            root_password: "fleetlite-root".to_string(),
            ssh_public_key: None,
            authorized_key: None,
            ssh_private_key: None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("root_password", &"******")
            .field("ssh_public_key", &self.ssh_public_key)
            .field("authorized_key", &self.authorized_key.is_some())
            .field("ssh_private_key", &self.ssh_private_key)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionOptions {
    /// Install command; `{packages}` is replaced by the space-joined list.
    pub install_command: String,
    pub packages: Vec<String>,
    /// Commands that configure the container runtime, run in order.
    pub runtime_commands: Vec<String>,
    /// Services enabled and restarted at the end of the script.
    pub services: Vec<String>,
    /// Bytes appended to every line sent to the console.
    pub send_delimiter: String,
    /// Byte that frames console output for `read_until`.
    pub frame_delimiter: char,
    pub login_timeout_secs: u64,
    pub step_timeout_secs: u64,
    pub install_timeout_secs: u64,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            install_command: "swupd bundle-add {packages}".to_string(),
            packages: vec!["cloud-native-basic".to_string()],
            runtime_commands: vec![
                "modprobe br_netfilter".to_string(),
                "sysctl -w net.ipv4.ip_forward=1".to_string(),
                "sysctl -w net.bridge.bridge-nf-call-iptables=1".to_string(),
            ],
            services: vec!["crio".to_string(), "kubelet".to_string()],
            send_delimiter: "\n".to_string(),
            frame_delimiter: ' ',
            login_timeout_secs: 300,
            step_timeout_secs: 120,
            install_timeout_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOptions {
    /// Run on the master; `{address}` is the master's address.
    pub init_command: String,
    /// Run on the master after init (kubeconfig, pod network).
    pub post_init_commands: Vec<String>,
    /// Regex with exactly one capture group yielding the join token.
    pub token_pattern: String,
    /// Run on each worker; `{endpoint}` and `{token}` are substituted.
    pub join_command: String,
    /// Run on the master; prints one line per node, status in column two.
    pub node_status_command: String,
    /// Run on the master; prints the admin kubeconfig.
    pub kubeconfig_command: String,
    pub shutdown_command: String,
    pub api_port: u16,
    pub cluster_ready_timeout_secs: u64,
    pub status_interval_secs: u64,
    /// Bound on each init, post-init, join and kubeconfig command.
    pub command_timeout_secs: u64,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            init_command: "kubeadm init --apiserver-advertise-address={address} --pod-network-cidr=10.244.0.0/16 --ignore-preflight-errors=Swap".to_string(),
            post_init_commands: vec![
                "mkdir -p $HOME/.kube && cp -f /etc/kubernetes/admin.conf $HOME/.kube/config".to_string(),
                "kubectl apply -f /usr/share/clr-k8s-examples/flannel/kube-flannel.yml".to_string(),
            ],
            token_pattern: r"--token\s+([a-z0-9]{6}\.[a-z0-9]{16})".to_string(),
            join_command: "kubeadm join {endpoint} --token {token} --discovery-token-unsafe-skip-ca-verification --ignore-preflight-errors=Swap".to_string(),
            node_status_command: "kubectl get nodes --no-headers".to_string(),
            kubeconfig_command: "cat /etc/kubernetes/admin.conf".to_string(),
            shutdown_command: "systemctl poweroff".to_string(),
            api_port: 6443,
            cluster_ready_timeout_secs: 600,
            status_interval_secs: 10,
            command_timeout_secs: 900,
        }
    }
}

impl ClusterOptions {
    pub fn cluster_ready_timeout(&self) -> Duration {
        Duration::from_secs(self.cluster_ready_timeout_secs)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// Compile the token pattern, requiring exactly one capture group.
    pub fn token_regex(&self) -> FleetResult<Regex> {
        let regex = Regex::new(&self.token_pattern)
            .map_err(|e| FleetError::Config(format!("invalid token_pattern: {}", e)))?;
        if regex.captures_len() != 2 {
            return Err(FleetError::Config(format!(
                "token_pattern must have exactly one capture group, found {}",
                regex.captures_len() - 1
            )));
        }
        Ok(regex)
    }
}

impl Credentials {
    /// Read `ssh_public_key` into `authorized_key` unless one is given inline.
    pub fn load_keys(&mut self) -> FleetResult<()> {
        if self.authorized_key.is_some() {
            return Ok(());
        }
        if let Some(path) = &self.ssh_public_key {
            let key = std::fs::read_to_string(path).map_err(|e| {
                FleetError::Config(format!(
                    "failed to read public key {}: {}",
                    path.display(),
                    e
                ))
            })?;
            self.authorized_key = Some(key.trim().to_string());
        }
        Ok(())
    }
}

impl ProvisionOptions {
    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }
}

impl FleetOptions {
    /// Load options from a JSON file.
    pub fn from_file(path: &Path) -> FleetResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            FleetError::Config(format!("failed to read config {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            FleetError::Config(format!("failed to parse config {}: {}", path.display(), e))
        })
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Validate options before any VM is started.
    pub fn sanitize(&self) -> FleetResult<()> {
        if self.nodes == 0 {
            return Err(FleetError::Config("nodes must be at least 1".into()));
        }
        if !self.base_image.is_file() {
            return Err(FleetError::Config(format!(
                "base image does not exist: {}",
                self.base_image.display()
            )));
        }
        if self.ready_timeout_secs == 0
            || self.provision.login_timeout_secs == 0
            || self.provision.step_timeout_secs == 0
            || self.provision.install_timeout_secs == 0
            || self.cluster.cluster_ready_timeout_secs == 0
            || self.cluster.command_timeout_secs == 0
        {
            return Err(FleetError::Config("timeouts must be non-zero".into()));
        }
        if self.credentials.root_password.is_empty() {
            return Err(FleetError::Config("root_password must not be empty".into()));
        }
        if !self.provision.frame_delimiter.is_ascii() {
            return Err(FleetError::Config(
                "frame_delimiter must be a single ASCII character".into(),
            ));
        }
        crate::network::NetworkPlan::new(&self.network, self.nodes)?;
        self.cluster.token_regex()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options_with_image(dir: &TempDir) -> FleetOptions {
        let image = dir.path().join("base.qcow2");
        std::fs::write(&image, b"qcow").unwrap();
        FleetOptions {
            base_image: image,
            work_dir: dir.path().join("run"),
            ..Default::default()
        }
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let options: FleetOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.nodes, 3);
        assert_eq!(options.cluster.api_port, 6443);
        assert_eq!(options.provision.frame_delimiter, ' ');
    }

    #[test]
    fn test_partial_json_overrides_nested_section() {
        let options: FleetOptions =
            serde_json::from_str(r#"{"nodes": 2, "provision": {"packages": ["a", "b"]}}"#)
                .unwrap();
        assert_eq!(options.nodes, 2);
        assert_eq!(options.provision.packages, vec!["a", "b"]);
        assert_eq!(options.provision.step_timeout_secs, 120);
    }

    #[test]
    fn test_sanitize_accepts_defaults_with_image() {
        let dir = TempDir::new().unwrap();
        options_with_image(&dir).sanitize().unwrap();
    }

    #[test]
    fn test_sanitize_rejects_bad_values() {
        let dir = TempDir::new().unwrap();

        let mut options = options_with_image(&dir);
        options.nodes = 0;
        assert!(matches!(options.sanitize(), Err(FleetError::Config(_))));

        let mut options = options_with_image(&dir);
        options.base_image = dir.path().join("missing.qcow2");
        assert!(matches!(options.sanitize(), Err(FleetError::Config(_))));

        let mut options = options_with_image(&dir);
        options.cluster.token_pattern = r"--token\s+\S+".to_string();
        assert!(matches!(options.sanitize(), Err(FleetError::Config(_))));

        let mut options = options_with_image(&dir);
        options.nodes = 100;
        assert!(matches!(options.sanitize(), Err(FleetError::Config(_))));
    }

    #[test]
    fn test_load_keys_reads_public_key_file() {
        let dir = TempDir::new().unwrap();
        let key_path = dir.path().join("id_ed25519.pub");
        std::fs::write(&key_path, "ssh-ed25519 AAAA fleet\n").unwrap();

        let mut credentials = Credentials {
            ssh_public_key: Some(key_path),
            ..Default::default()
        };
        credentials.load_keys().unwrap();
        assert_eq!(credentials.authorized_key.as_deref(), Some("ssh-ed25519 AAAA fleet"));

        let mut missing = Credentials {
            ssh_public_key: Some(dir.path().join("missing.pub")),
            ..Default::default()
        };
        assert!(matches!(missing.load_keys(), Err(FleetError::Config(_))));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let rendered = format!("{:?}", Credentials::default());
        assert!(!rendered.contains("fleetlite-root"));
    }
}
