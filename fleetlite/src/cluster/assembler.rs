use super::exec::{CommandOutput, GuestExec};
use super::token::JoinToken;
use crate::layout::FleetLayout;
use crate::network::{NetworkPlan, NodeNetwork};
use crate::options::ClusterOptions;
use fleetlite_shared::{FleetError, FleetResult};
use regex::Regex;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;

/// Outcome of a successful assembly.
#[derive(Debug, Clone)]
pub struct ClusterReport {
    pub master: Ipv4Addr,
    pub endpoint: String,
    pub nodes_ready: usize,
    pub kubeconfig: PathBuf,
}

/// Turns a ready fleet into one cluster. VM 0 is the master.
pub struct ClusterAssembler {
    options: ClusterOptions,
    token_pattern: Regex,
    plan: Arc<NetworkPlan>,
    exec: Arc<dyn GuestExec>,
    layout: FleetLayout,
}

impl ClusterAssembler {
    pub fn new(
        options: ClusterOptions,
        plan: Arc<NetworkPlan>,
        exec: Arc<dyn GuestExec>,
        layout: FleetLayout,
    ) -> FleetResult<Self> {
        if plan.is_empty() {
            return Err(FleetError::Config("cannot assemble an empty fleet".into()));
        }
        Ok(Self {
            token_pattern: options.token_regex()?,
            options,
            plan,
            exec,
            layout,
        })
    }

    fn master(&self) -> FleetResult<&NodeNetwork> {
        self.plan.node(0)
    }

    pub fn endpoint(&self) -> FleetResult<String> {
        Ok(format!("{}:{}", self.master()?.address, self.options.api_port))
    }

    /// Init the master, join every worker, wait for all nodes, fetch the
    /// admin kubeconfig.
    pub async fn assemble(&self) -> FleetResult<ClusterReport> {
        let master = self.master()?.clone();
        let endpoint = self.endpoint()?;
        tracing::info!(master = %master.address, nodes = self.plan.len(), "Assembling cluster");

        let token = self.init_master(&master).await?;
        self.join_workers(&endpoint, &token).await?;
        let nodes_ready = self.wait_nodes_ready(&master).await?;
        let kubeconfig = self.fetch_kubeconfig(&master).await?;

        tracing::info!(nodes_ready, %endpoint, kubeconfig = %kubeconfig.display(), "Cluster ready");
        Ok(ClusterReport {
            master: master.address,
            endpoint,
            nodes_ready,
            kubeconfig,
        })
    }

    async fn init_master(&self, master: &NodeNetwork) -> FleetResult<JoinToken> {
        let command = self
            .options
            .init_command
            .replace("{address}", &master.address.to_string());
        let output = self.run_checked(master, &command).await?;

        let token = JoinToken::extract(&output.stdout, &self.token_pattern).inspect_err(|_| {
            tracing::error!(
                vm = master.index,
                "No join token in cluster-init output; init tool output format changed?"
            );
        })?;
        tracing::info!(vm = master.index, "Cluster initialized");

        for command in &self.options.post_init_commands {
            self.run_checked(master, command).await?;
        }
        Ok(token)
    }

    async fn join_workers(&self, endpoint: &str, token: &JoinToken) -> FleetResult<()> {
        for worker in self.plan.nodes().iter().skip(1) {
            let command = self
                .options
                .join_command
                .replace("{endpoint}", endpoint)
                .replace("{token}", token.secret());

            self.run_checked(worker, &command)
                .await
                .map_err(|e| match e {
                    FleetError::CommandFailed {
                        index,
                        command,
                        status,
                        stderr,
                    } => FleetError::CommandFailed {
                        index,
                        command: token.redact(&command),
                        status,
                        stderr: token.redact(&stderr),
                    },
                    FleetError::CommandTimeout {
                        index,
                        command,
                        timeout,
                    } => FleetError::CommandTimeout {
                        index,
                        command: token.redact(&command),
                        timeout,
                    },
                    other => other,
                })?;
            tracing::info!(vm = worker.index, "Node joined");
        }
        Ok(())
    }

    /// Poll node status on the master until every node is Ready.
    ///
    /// Bounded by `cluster_ready_timeout`, including a status command that
    /// never returns.
    async fn wait_nodes_ready(&self, master: &NodeNetwork) -> FleetResult<usize> {
        let expected = self.plan.len();
        let deadline = Instant::now() + self.options.cluster_ready_timeout();
        let interval = self.options.status_interval();
        let mut ready = 0;

        loop {
            let bound = deadline
                .saturating_duration_since(Instant::now())
                .min(self.options.command_timeout());
            let status = self
                .exec
                .exec(master.index, master.address, &self.options.node_status_command);
            match tokio::time::timeout(bound, status).await {
                Ok(output) => {
                    let output = output?;
                    ready = if output.success() {
                        count_ready_nodes(&output.stdout)
                    } else {
                        tracing::debug!(status = output.status, "Node status command failed");
                        0
                    };
                }
                Err(_) => tracing::warn!(vm = master.index, ?bound, "Node status command hung"),
            }

            if ready >= expected {
                return Ok(ready);
            }
            if Instant::now() >= deadline {
                return Err(FleetError::ClusterNotReady { ready, expected });
            }
            tracing::info!(ready, expected, "Waiting for cluster nodes");
            tokio::time::sleep(interval.min(deadline.saturating_duration_since(Instant::now())))
                .await;
        }
    }

    async fn fetch_kubeconfig(&self, master: &NodeNetwork) -> FleetResult<PathBuf> {
        let output = self
            .run_checked(master, &self.options.kubeconfig_command)
            .await?;
        let path = self.layout.kubeconfig_path();
        std::fs::write(&path, output.stdout.as_bytes()).map_err(|e| {
            FleetError::Storage(format!("failed to write {}: {}", path.display(), e))
        })?;
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        }
        Ok(path)
    }

    /// `exec_checked` bounded by `command_timeout`.
    async fn run_checked(&self, node: &NodeNetwork, command: &str) -> FleetResult<CommandOutput> {
        let timeout = self.options.command_timeout();
        tokio::time::timeout(
            timeout,
            self.exec.exec_checked(node.index, node.address, command),
        )
        .await
        .map_err(|_| FleetError::CommandTimeout {
            index: node.index,
            command: command.to_string(),
            timeout,
        })?
    }

    /// Ask every guest to power off, workers first.
    ///
    /// Errors are expected (the connection drops) and only logged.
    pub async fn shutdown_all(&self) {
        let timeout = self.options.command_timeout();
        for node in self.plan.nodes().iter().rev() {
            let poweroff = self
                .exec
                .exec(node.index, node.address, &self.options.shutdown_command);
            match tokio::time::timeout(timeout, poweroff).await {
                Ok(Ok(output)) if !output.success() => {
                    tracing::debug!(vm = node.index, status = output.status, "Shutdown command returned non-zero")
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!(vm = node.index, "Shutdown command failed: {}", e),
                Err(_) => tracing::warn!(vm = node.index, ?timeout, "Shutdown command hung"),
            }
        }
    }
}

/// Number of `Ready` nodes in `kubectl get nodes --no-headers` output.
pub fn count_ready_nodes(output: &str) -> usize {
    output
        .lines()
        .filter(|line| line.split_whitespace().nth(1) == Some("Ready"))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::fake::FakeExec;
    use crate::options::NetworkOptions;
    use std::time::Duration;
    use tempfile::TempDir;

    fn assembler(nodes: usize, exec: &FakeExec, temp: &TempDir) -> ClusterAssembler {
        let layout = FleetLayout::new(temp.path());
        let plan = Arc::new(NetworkPlan::new(&NetworkOptions::default(), nodes).unwrap());
        let options = ClusterOptions {
            cluster_ready_timeout_secs: 30,
            status_interval_secs: 5,
            ..Default::default()
        };
        ClusterAssembler::new(options, plan, Arc::new(exec.clone()), layout).unwrap()
    }

    #[test]
    fn test_count_ready_nodes() {
        let output = "\
host-0   Ready      control-plane   5m    v1.28.2
host-1   NotReady   <none>          1m    v1.28.2
host-2   Ready      <none>          1m    v1.28.2
";
        assert_eq!(count_ready_nodes(output), 2);
        assert_eq!(count_ready_nodes(""), 0);
    }

    #[tokio::test]
    async fn test_assemble_joins_workers_in_order() {
        let temp = TempDir::new().unwrap();
        let exec = FakeExec::new();
        let report = assembler(3, &exec, &temp).assemble().await.unwrap();

        assert_eq!(report.nodes_ready, 3);
        assert_eq!(report.endpoint, "192.168.7.2:6443");
        assert_eq!(exec.count_matching(0, "kubeadm init"), 1);

        let joins = exec.calls_matching("kubeadm join");
        assert_eq!(
            joins.iter().map(|(i, _)| *i).collect::<Vec<_>>(),
            vec![1, 2]
        );
        assert!(joins[0].1.contains("192.168.7.2:6443"));
        assert!(joins[0].1.contains(FakeExec::TOKEN));

        let kubeconfig = std::fs::read_to_string(report.kubeconfig).unwrap();
        assert!(kubeconfig.contains("apiVersion: v1"));
    }

    #[tokio::test]
    async fn test_missing_token_stops_before_join() {
        let temp = TempDir::new().unwrap();
        let exec = FakeExec::new().with_init_output("[init] Using Kubernetes version\n");

        let err = assembler(2, &exec, &temp).assemble().await.unwrap_err();
        assert!(matches!(err, FleetError::TokenNotFound));
        assert!(exec.calls_matching("kubeadm join").is_empty());
    }

    #[tokio::test]
    async fn test_join_failure_redacts_token() {
        let temp = TempDir::new().unwrap();
        let exec = FakeExec::new().fail_on(2, "kubeadm join");

        let err = assembler(3, &exec, &temp).assemble().await.unwrap_err();
        assert_eq!(err.vm_index(), Some(2));
        assert!(!err.to_string().contains(FakeExec::TOKEN));
    }

    #[tokio::test(start_paused = true)]
    async fn test_nodes_never_ready_is_bounded() {
        let temp = TempDir::new().unwrap();
        let exec = FakeExec::new().cap_ready_nodes(2);

        let started = Instant::now();
        let err = assembler(3, &exec, &temp).assemble().await.unwrap_err();
        assert!(matches!(
            err,
            FleetError::ClusterNotReady {
                ready: 2,
                expected: 3
            }
        ));
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_status_command_is_bounded() {
        let temp = TempDir::new().unwrap();
        let exec = FakeExec::new().hang_on("kubectl get nodes");

        let started = Instant::now();
        let err = tokio::time::timeout(
            Duration::from_secs(3600),
            assembler(3, &exec, &temp).assemble(),
        )
        .await
        .expect("assemble must return within its own bound")
        .unwrap_err();

        assert!(matches!(
            err,
            FleetError::ClusterNotReady {
                ready: 0,
                expected: 3
            }
        ));
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(60));
        assert_eq!(exec.count_matching(0, "kubectl get nodes"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_init_times_out() {
        let temp = TempDir::new().unwrap();
        let exec = FakeExec::new().hang_on("kubeadm init");

        let err = assembler(2, &exec, &temp).assemble().await.unwrap_err();
        match err {
            FleetError::CommandTimeout { index, timeout, .. } => {
                assert_eq!(index, 0);
                assert_eq!(timeout, Duration::from_secs(900));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(exec.calls_matching("kubeadm join").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_join_redacts_token() {
        let temp = TempDir::new().unwrap();
        let exec = FakeExec::new().hang_on("kubeadm join");

        let err = assembler(2, &exec, &temp).assemble().await.unwrap_err();
        assert!(matches!(err, FleetError::CommandTimeout { index: 1, .. }));
        assert!(!err.to_string().contains(FakeExec::TOKEN));
    }

    #[tokio::test]
    async fn test_shutdown_all_tolerates_dropped_connections() {
        let temp = TempDir::new().unwrap();
        let exec = FakeExec::new();
        let assembler = assembler(2, &exec, &temp);

        assembler.shutdown_all().await;
        let calls = exec.calls_matching("systemctl poweroff");
        assert_eq!(calls.iter().map(|(i, _)| *i).collect::<Vec<_>>(), vec![1, 0]);
    }
}
