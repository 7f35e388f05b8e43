use super::step_names as names;
use super::steps::{ScriptStep, StepAction, StepPhase, shell_quote, step_markers};
use crate::console::ConsoleSession;
use crate::network::NetworkPlan;
use crate::options::{Credentials, ProvisionOptions};
use fleetlite_shared::{FleetError, FleetResult};

const NETWORK_UNIT: &str = "/etc/systemd/network/10-fleetlite.network";

/// Ordered console interaction that configures one freshly booted VM.
#[derive(Debug, Clone)]
pub struct ProvisioningScript {
    index: usize,
    steps: Vec<ScriptStep>,
}

impl ProvisioningScript {
    /// Build the script for VM `index`.
    ///
    /// Deterministic: the same inputs always produce the same steps.
    pub fn build(
        index: usize,
        plan: &NetworkPlan,
        credentials: &Credentials,
        options: &ProvisionOptions,
    ) -> FleetResult<Self> {
        let node = plan.node(index)?;
        let login = options.login_timeout();
        let step = options.step_timeout();
        let password = credentials.root_password.as_str();

        let mut steps = vec![
            ScriptStep::expect(names::LOGIN_PROMPT, StepPhase::Boot, "login:", login),
            ScriptStep::send(names::LOGIN_USER, StepPhase::Configure, &credentials.user, step),
            ScriptStep::expect(
                names::PASSWORD_PROMPT,
                StepPhase::Configure,
                "New password:",
                step,
            ),
            ScriptStep::send_secret(names::PASSWORD_NEW, StepPhase::Configure, password, step),
            ScriptStep::expect(
                names::PASSWORD_CONFIRM_PROMPT,
                StepPhase::Configure,
                "Retype new password:",
                step,
            ),
            ScriptStep::send_secret(names::PASSWORD_CONFIRM, StepPhase::Configure, password, step),
            ScriptStep::expect(names::SHELL_PROMPT, StepPhase::Configure, "# ", step),
        ];

        // Remote execution
        let mut remote = Vec::new();
        if let Some(key) = credentials.authorized_key.as_deref() {
            remote.push("mkdir -p -m 700 /root/.ssh".to_string());
            remote.push(format!(
                "echo {} >> /root/.ssh/authorized_keys",
                shell_quote(key)
            ));
            remote.push("chmod 600 /root/.ssh/authorized_keys".to_string());
        }
        remote.push("systemctl enable --now sshd".to_string());
        steps.push(ScriptStep::run(names::ENABLE_REMOTE_EXEC, remote.join(" && "), step));

        // Network: static address on the VM's /30, hostname, and every node in /etc/hosts
        let unit = [
            "[Match]".to_string(),
            format!("Name={}", plan.interface()),
            String::new(),
            "[Network]".to_string(),
            format!("Address={}/{}", node.address, node.prefix_len),
            format!("Gateway={}", node.gateway),
            format!("DNS={}", plan.dns()),
        ];
        let mut hosts = vec!["127.0.0.1 localhost".to_string()];
        hosts.extend(plan.hosts_entries());
        let network = [
            "mkdir -p /etc/systemd/network".to_string(),
            format!("printf '%s\\n' {} > {}", quote_all(&unit), NETWORK_UNIT),
            format!("hostnamectl set-hostname {}", node.hostname),
            format!("printf '%s\\n' {} > /etc/hosts", quote_all(&hosts)),
            "systemctl restart systemd-networkd".to_string(),
        ];
        steps.push(ScriptStep::run(names::CONFIGURE_NETWORK, network.join(" && "), step));

        let install = options
            .install_command
            .replace("{packages}", &options.packages.join(" "));
        steps.push(ScriptStep::run(
            names::INSTALL_PACKAGES,
            install,
            options.install_timeout(),
        ));

        // kubeadm runs with swap preflight errors ignored
        steps.push(ScriptStep::run(names::DISABLE_SWAP, "swapoff -a", step).tolerate_failure());

        let runtime = if options.runtime_commands.is_empty() {
            "true".to_string()
        } else {
            options.runtime_commands.join(" && ")
        };
        steps.push(ScriptStep::run(names::CONFIGURE_RUNTIME, runtime, step));

        let mut services = vec!["systemctl daemon-reload".to_string()];
        for service in &options.services {
            services.push(format!("systemctl enable {}", service));
            services.push(format!("systemctl restart {}", service));
        }
        steps.push(ScriptStep::run(names::ENABLE_SERVICES, services.join(" && "), step));

        Ok(Self { index, steps })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    /// Run every step in order against `session`.
    ///
    /// `observer` is called before each step starts. The first failing step
    /// aborts the run with `ProvisioningFailed { step, .. }`.
    pub async fn run<F>(&self, session: &mut ConsoleSession, mut observer: F) -> FleetResult<()>
    where
        F: FnMut(&ScriptStep),
    {
        for step in &self.steps {
            observer(step);
            tracing::debug!(vm = self.index, step = step.name, "Running provisioning step");
            Self::run_step(session, step)
                .await
                .map_err(|e| FleetError::provisioning(step.name, e))?;
        }
        tracing::info!(vm = self.index, steps = self.steps.len(), "Provisioning complete");
        Ok(())
    }

    async fn run_step(session: &mut ConsoleSession, step: &ScriptStep) -> FleetResult<()> {
        match &step.action {
            StepAction::Expect(pattern) => session.wait_for(pattern, step.timeout).await,
            StepAction::Send(line) => session.send(line).await,
            StepAction::SendSecret(line) => session.send_secret(line).await,
            StepAction::Run {
                command,
                tolerate_failure,
            } => {
                let typed = step
                    .wrapped_command()
                    .ok_or_else(|| FleetError::Internal(format!("{} is not a run step", step.name)))?;
                let (ok, failed) = step_markers(step.name);

                session.send(&typed).await?;
                let matched = session
                    .wait_for_any(&[ok.as_str(), failed.as_str()], step.timeout)
                    .await?;

                if matched == 1 {
                    if !tolerate_failure {
                        return Err(FleetError::StepFailed {
                            command: command.clone(),
                        });
                    }
                    tracing::warn!(step = step.name, "Tolerated step failure");
                }
                Ok(())
            }
        }
    }
}

fn quote_all(lines: &[String]) -> String {
    lines
        .iter()
        .map(|line| shell_quote(line))
        .collect::<Vec<_>>()
        .join(" ")
}
