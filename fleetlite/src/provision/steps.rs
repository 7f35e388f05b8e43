use fleetlite_shared::constants::console;
use std::fmt;
use std::time::Duration;

/// Coarse phase of a step, used to drive the VM state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    /// Waiting for the guest to boot to a login prompt.
    Boot,
    /// Logged in and configuring the guest.
    Configure,
}

#[derive(Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Wait until the substring shows up in console output.
    Expect(String),
    /// Type a line.
    Send(String),
    /// Type a line that must not show up in transcripts or logs.
    SendSecret(String),
    /// Run a shell command and wait for its completion marker.
    Run {
        command: String,
        /// Accept the failure marker as completion.
        tolerate_failure: bool,
    },
}

impl fmt::Debug for StepAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepAction::Expect(pattern) => f.debug_tuple("Expect").field(pattern).finish(),
            StepAction::Send(line) => f.debug_tuple("Send").field(line).finish(),
            StepAction::SendSecret(_) => f.debug_tuple("SendSecret").field(&"******").finish(),
            StepAction::Run {
                command,
                tolerate_failure,
            } => f
                .debug_struct("Run")
                .field("command", command)
                .field("tolerate_failure", tolerate_failure)
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptStep {
    pub name: &'static str,
    pub phase: StepPhase,
    pub action: StepAction,
    pub timeout: Duration,
}

impl ScriptStep {
    pub fn expect(name: &'static str, phase: StepPhase, pattern: &str, timeout: Duration) -> Self {
        Self {
            name,
            phase,
            action: StepAction::Expect(pattern.to_string()),
            timeout,
        }
    }

    pub fn send(name: &'static str, phase: StepPhase, line: &str, timeout: Duration) -> Self {
        Self {
            name,
            phase,
            action: StepAction::Send(line.to_string()),
            timeout,
        }
    }

    pub fn send_secret(name: &'static str, phase: StepPhase, line: &str, timeout: Duration) -> Self {
        Self {
            name,
            phase,
            action: StepAction::SendSecret(line.to_string()),
            timeout,
        }
    }

    pub fn run(name: &'static str, command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name,
            phase: StepPhase::Configure,
            action: StepAction::Run {
                command: command.into(),
                tolerate_failure: false,
            },
            timeout,
        }
    }

    pub fn tolerate_failure(mut self) -> Self {
        if let StepAction::Run {
            tolerate_failure, ..
        } = &mut self.action
        {
            *tolerate_failure = true;
        }
        self
    }

    /// The line actually typed for a `Run` step.
    ///
    /// The command runs under `sh -e`, so a failure anywhere in a `;`
    /// sequence reports the failure marker. The completion markers are
    /// echoed with their halves in separate quotes, so the terminal's echo of
    /// the typed line never contains a whole marker.
    pub fn wrapped_command(&self) -> Option<String> {
        match &self.action {
            StepAction::Run { command, .. } => {
                let head = shell_quote(&format!("{}{}", console::MARKER_PREFIX, self.name));
                Some(format!(
                    "sh -ec {} && echo {}{} || echo {}{}",
                    shell_quote(command),
                    head,
                    shell_quote(console::OK_SUFFIX),
                    head,
                    shell_quote(console::FAILED_SUFFIX)
                ))
            }
            _ => None,
        }
    }
}

/// Completion markers `(ok, failed)` printed by the guest for step `name`.
pub fn step_markers(name: &str) -> (String, String) {
    let head = format!("{}{}", console::MARKER_PREFIX, name);
    (
        format!("{}{}", head, console::OK_SUFFIX),
        format!("{}{}", head, console::FAILED_SUFFIX),
    )
}

/// Single-quote `value` for a POSIX shell.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
