//! Cluster assembly over remote command execution.
//!
//! Runs strictly after the fleet barrier: master init, token extraction,
//! worker joins in index order, then a bounded wait for every node to report
//! Ready.

mod assembler;
mod exec;
#[cfg(test)]
pub(crate) mod fake;
mod token;

pub use assembler::{ClusterAssembler, ClusterReport, count_ready_nodes};
pub use exec::{CommandOutput, GuestExec, SshExec};
pub use token::JoinToken;
