//! First-boot provisioning over the serial console.
//!
//! A [`ProvisioningScript`] is an ordered list of typed [`ScriptStep`]s built
//! from the VM's index, the fleet network plan, credentials and provisioning
//! options. Running it against a [`ConsoleSession`](crate::console::ConsoleSession)
//! either completes every step or fails with the name of the first step that
//! did not.

mod script;
mod steps;

pub use script::ProvisioningScript;
pub use steps::{ScriptStep, StepAction, StepPhase, step_markers};

/// Stable step names.
pub mod step_names {
    pub const LOGIN_PROMPT: &str = "login-prompt";
    pub const LOGIN_USER: &str = "login-user";
    pub const PASSWORD_PROMPT: &str = "password-prompt";
    pub const PASSWORD_NEW: &str = "password-new";
    pub const PASSWORD_CONFIRM_PROMPT: &str = "password-confirm-prompt";
    pub const PASSWORD_CONFIRM: &str = "password-confirm";
    pub const SHELL_PROMPT: &str = "shell-prompt";
    pub const ENABLE_REMOTE_EXEC: &str = "enable-remote-exec";
    pub const CONFIGURE_NETWORK: &str = "configure-network";
    pub const INSTALL_PACKAGES: &str = "install-packages";
    pub const DISABLE_SWAP: &str = "disable-swap";
    pub const CONFIGURE_RUNTIME: &str = "configure-runtime";
    pub const ENABLE_SERVICES: &str = "enable-services";
}
