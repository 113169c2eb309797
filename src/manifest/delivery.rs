//! Upload a rendered manifest and apply it with kubectl

use crate::core::{Node, RemoteCommand};
use crate::manifest::{render, unresolved_placeholders, ManifestTemplate};
use crate::remote::{RemoteError, RemoteExecutor};
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Applies the staged file and removes it whether or not apply succeeded
const APPLY_SCRIPT: &str = r#"kubectl apply -f "$1"; status=$?; rm -f "$1"; exit $status"#;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("could not read template {path}: {source}")]
    TemplateUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("upload failed: {0}")]
    Upload(#[source] RemoteError),

    #[error("kubectl apply failed: {0}")]
    Apply(#[source] RemoteError),
}

/// Renders templates from a local directory and applies them on a node
#[derive(Debug, Clone)]
pub struct ManifestDelivery {
    templates_dir: PathBuf,
}

impl ManifestDelivery {
    pub fn new(templates_dir: impl Into<PathBuf>) -> Self {
        Self {
            templates_dir: templates_dir.into(),
        }
    }

    pub fn templates_dir(&self) -> &PathBuf {
        &self.templates_dir
    }

    /// Read, render, upload, then `kubectl apply`. The file is on the node before apply runs.
    pub async fn deliver<E: RemoteExecutor + ?Sized>(
        &self,
        executor: &E,
        node: &Node,
        manifest: &ManifestTemplate,
    ) -> Result<(), DeliveryError> {
        let path = manifest.resolve(&self.templates_dir);
        let template = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| DeliveryError::TemplateUnreadable {
                path: path.clone(),
                source,
            })?;

        let rendered = render(&template, &manifest.values);
        let leftover = unresolved_placeholders(&rendered);
        if !leftover.is_empty() {
            warn!(
                template = %path.display(),
                placeholders = ?leftover,
                "Template still has unresolved placeholders"
            );
        }

        let remote_path = manifest.remote_path_in(&node.home_dir());
        executor
            .upload(node, &remote_path, rendered.as_bytes())
            .await
            .map_err(DeliveryError::Upload)?;

        let apply = RemoteCommand::script(APPLY_SCRIPT).arg(remote_path.as_str()).privileged();
        executor.run(node, &apply).await.map_err(DeliveryError::Apply)?;

        info!(host = %node.address, manifest = %manifest.template_path.display(), "Applied manifest");
        Ok(())
    }
}
