//! Remote command execution over SSH
//!
//! [`RemoteExecutor`] is the seam between the installer and the network. The
//! real implementation is [`SshExecutor`]; tests substitute a recording mock.

pub mod error;
pub mod host_keys;
pub mod session;
pub mod terminal;


use crate::core::{Node, RemoteCommand};
use async_trait::async_trait;

pub use error::RemoteError;
pub use host_keys::HostKeyPolicy;
pub use session::SshExecutor;

/// Output of a command that exited zero
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
}

impl CommandOutput {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            ..Default::default()
        }
    }
}

/// Runs commands and moves files on remote hosts
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Run a command and capture its output. A non-zero exit is an error.
    async fn run(&self, node: &Node, command: &RemoteCommand) -> Result<CommandOutput, RemoteError>;

    /// Run a command attached to the local terminal through a pty
    async fn run_interactive(&self, node: &Node, command: &RemoteCommand) -> Result<(), RemoteError>;

    /// Write `contents` to `remote_path`, created with mode 0600
    async fn upload(&self, node: &Node, remote_path: &str, contents: &[u8]) -> Result<(), RemoteError>;

    /// Read the file at `remote_path`
    async fn download(&self, node: &Node, remote_path: &str) -> Result<Vec<u8>, RemoteError>;
}

#[async_trait]
impl<T: RemoteExecutor + ?Sized> RemoteExecutor for std::sync::Arc<T> {
    async fn run(&self, node: &Node, command: &RemoteCommand) -> Result<CommandOutput, RemoteError> {
        (**self).run(node, command).await
    }

    async fn run_interactive(&self, node: &Node, command: &RemoteCommand) -> Result<(), RemoteError> {
        (**self).run_interactive(node, command).await
    }

    async fn upload(&self, node: &Node, remote_path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        (**self).upload(node, remote_path, contents).await
    }

    async fn download(&self, node: &Node, remote_path: &str) -> Result<Vec<u8>, RemoteError> {
        (**self).download(node, remote_path).await
    }
}
