//! k3s-installer - provision and tear down k3s clusters over SSH

pub mod cli;
pub mod cluster;
pub mod core;
pub mod execution;
pub mod manifest;
pub mod remote;

// Re-export commonly used types
pub use cluster::{ClusterOrchestrator, Routine, RunError};
pub use core::config::ClusterConfig;
pub use core::{JoinToken, Node, NodeRole, Phase, RunReport, RunStatus, Step};
pub use execution::{ExecutionEvent, Reporter, RetryPolicy, SchedulingStrategy, SharedReporter};
pub use remote::{CommandOutput, RemoteError, RemoteExecutor, SshExecutor};
