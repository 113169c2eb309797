//! Session executor errors

use thiserror::Error;

/// Errors from running commands or moving files on a remote host
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("could not connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("connection to {host} timed out after {secs}s")]
    Timeout { host: String, secs: u64 },

    #[error("authentication rejected for {user}@{host}")]
    AuthRejected { host: String, user: String },

    #[error("host key for {host} rejected: {reason}")]
    HostKeyRejected { host: String, reason: String },

    #[error("channel error on {host}: {reason}")]
    Channel { host: String, reason: String },

    #[error("`{command}` on {host} exited with status {status}: {stderr}")]
    NonZeroExit {
        host: String,
        /// Program label only; arguments may carry paths but never secrets
        command: String,
        status: u32,
        stderr: String,
    },

    #[error("`{command}` on {host} was killed by signal {signal}")]
    Signalled {
        host: String,
        command: String,
        signal: String,
    },

    #[error("file transfer of {path} on {host} failed: {reason}")]
    Transfer {
        host: String,
        path: String,
        reason: String,
    },

    #[error("interrupted by signal")]
    Interrupted,

    #[error("local terminal error: {0}")]
    Terminal(String),
}

impl RemoteError {
    /// Whether the command ran and reported failure, as opposed to not running at all
    pub fn is_exit_failure(&self) -> bool {
        matches!(self, RemoteError::NonZeroExit { .. })
    }

    pub fn channel(host: &str, reason: impl std::fmt::Display) -> Self {
        RemoteError::Channel {
            host: host.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn transfer(host: &str, path: &str, reason: impl std::fmt::Display) -> Self {
        RemoteError::Transfer {
            host: host.to_string(),
            path: path.to_string(),
            reason: reason.to_string(),
        }
    }
}
