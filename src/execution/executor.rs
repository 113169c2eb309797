//! Step executor - runs a single step against a node

use crate::core::{ExecMode, Node, Step, StepAction, TokenError};
use crate::execution::retry::retry_with_policy;
use crate::manifest::{DeliveryError, ManifestDelivery};
use crate::remote::{RemoteError, RemoteExecutor};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Why a step failed
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("local file {path}: {source}")]
    LocalIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("join token: {0}")]
    Token(#[from] TokenError),

    /// The node's pipeline task died before producing a result
    #[error("node pipeline aborted: {0}")]
    Aborted(String),
}

/// Executes individual steps
pub struct StepExecutor<E: ?Sized> {
    remote: Arc<E>,
    delivery: ManifestDelivery,
}

impl<E: RemoteExecutor + ?Sized> StepExecutor<E> {
    pub fn new(remote: Arc<E>, delivery: ManifestDelivery) -> Self {
        Self { remote, delivery }
    }

    pub fn remote(&self) -> &Arc<E> {
        &self.remote
    }

    /// Execute one step
    pub async fn execute(&self, node: &Node, step: &Step) -> Result<(), StepError> {
        info!(host = %node.address, step = %step.name, "Executing step");

        match &step.action {
            StepAction::Run {
                command,
                mode: ExecMode::Captured,
            } => {
                let output = self.remote.run(node, command).await?;
                debug!(host = %node.address, step = %step.name, stdout = %output.stdout.trim_end(), "Step output");
            }
            StepAction::Run {
                command,
                mode: ExecMode::Interactive,
            } => {
                self.remote.run_interactive(node, command).await?;
            }
            StepAction::Deliver(manifest) => {
                self.delivery.deliver(self.remote.as_ref(), node, manifest).await?;
            }
            StepAction::WaitFor { command, policy } => {
                retry_with_policy(policy, &step.name, || self.remote.run(node, command)).await?;
            }
            StepAction::Pause(duration) => {
                debug!(step = %step.name, secs = duration.as_secs(), "Pausing");
                tokio::time::sleep(*duration).await;
            }
        }

        Ok(())
    }
}
