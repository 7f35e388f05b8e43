use crate::options::Credentials;
use async_trait::async_trait;
use fleetlite_shared::{FleetError, FleetResult};
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs one shell command on a guest.
#[async_trait]
pub trait GuestExec: Send + Sync {
    /// Run `command` on VM `index`. Any exit status is returned as output.
    async fn exec(&self, index: usize, address: Ipv4Addr, command: &str)
    -> FleetResult<CommandOutput>;

    /// Like `exec`, but a non-zero exit is `CommandFailed`.
    async fn exec_checked(
        &self,
        index: usize,
        address: Ipv4Addr,
        command: &str,
    ) -> FleetResult<CommandOutput> {
        let output = self.exec(index, address, command).await?;
        if !output.success() {
            return Err(FleetError::CommandFailed {
                index,
                command: command.to_string(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output)
    }
}

/// `GuestExec` over the system `ssh` client.
#[derive(Debug, Clone)]
pub struct SshExec {
    binary: PathBuf,
    user: String,
    identity: Option<PathBuf>,
    connect_timeout_secs: u64,
}

impl SshExec {
    pub fn new(credentials: &Credentials) -> Self {
        Self {
            binary: PathBuf::from("ssh"),
            user: credentials.user.clone(),
            identity: credentials.ssh_private_key.clone(),
            connect_timeout_secs: 10,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Non-interactive: batch mode, no host key checks (guests are fresh
    /// every run), quiet.
    fn args(&self, address: Ipv4Addr, command: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "-o",
            "BatchMode=yes",
            "-o",
            "StrictHostKeyChecking=no",
            "-o",
            "UserKnownHostsFile=/dev/null",
            "-o",
            "LogLevel=ERROR",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push("-o".into());
        args.push(format!("ConnectTimeout={}", self.connect_timeout_secs).into());
        if let Some(identity) = &self.identity {
            args.push("-i".into());
            args.push(identity.clone().into());
        }
        args.push(format!("{}@{}", self.user, address).into());
        args.push(command.into());
        args
    }
}

#[async_trait]
impl GuestExec for SshExec {
    async fn exec(
        &self,
        index: usize,
        address: Ipv4Addr,
        command: &str,
    ) -> FleetResult<CommandOutput> {
        let output = Command::new(&self.binary)
            .args(self.args(address, command))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| {
                FleetError::Engine(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            status: output.status.code().unwrap_or(-1),
        };
        tracing::debug!(vm = index, %address, status = output.status, "Guest command finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn credentials() -> Credentials {
        Credentials {
            ssh_private_key: Some(PathBuf::from("/keys/id_ed25519")),
            ..Default::default()
        }
    }

    #[test]
    fn test_args_target_guest() {
        let exec = SshExec::new(&credentials());
        let args: Vec<String> = exec
            .args(Ipv4Addr::new(192, 168, 7, 2), "uptime")
            .into_iter()
            .map(|a| a.into_string().unwrap())
            .collect();

        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "/keys/id_ed25519");
        assert_eq!(&args[args.len() - 2..], ["root@192.168.7.2", "uptime"]);
    }

    /// `ssh` stand-in that runs the command locally.
    fn fake_ssh(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("ssh");
        std::fs::write(&path, "#!/bin/sh\nfor last; do :; done\nexec sh -c \"$last\"\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_exec_captures_output_and_status() {
        let dir = TempDir::new().unwrap();
        let exec = SshExec::new(&credentials()).with_binary(fake_ssh(&dir));
        let address = Ipv4Addr::new(192, 168, 7, 2);

        let output = exec.exec(0, address, "echo hello").await.unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert!(output.success());

        let output = exec.exec(0, address, "echo nope >&2; exit 7").await.unwrap();
        assert_eq!(output.status, 7);

        let err = exec
            .exec_checked(1, address, "echo nope >&2; exit 7")
            .await
            .unwrap_err();
        match err {
            FleetError::CommandFailed {
                index,
                status,
                stderr,
                ..
            } => {
                assert_eq!(index, 1);
                assert_eq!(status, 7);
                assert_eq!(stderr, "nope");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
