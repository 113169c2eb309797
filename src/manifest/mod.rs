//! Manifest templates: rendering and delivery to the control plane

pub mod delivery;
pub mod render;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use delivery::{DeliveryError, ManifestDelivery};
pub use render::{render, unresolved_placeholders};

/// A manifest file to render and apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTemplate {
    /// Path relative to the templates directory
    pub template_path: PathBuf,

    /// Destination on the node; relative paths land in the login user's home
    pub remote_path: String,

    /// Placeholder (including braces) to value
    pub values: BTreeMap<String, String>,
}

impl ManifestTemplate {
    pub fn new(template_path: impl Into<PathBuf>, remote_path: impl Into<String>) -> Self {
        Self {
            template_path: template_path.into(),
            remote_path: remote_path.into(),
            values: BTreeMap::new(),
        }
    }

    /// Template whose staged copy keeps the template's file name
    pub fn from_template(template_path: impl Into<PathBuf>) -> Self {
        let template_path = template_path.into();
        let remote_path = template_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest.yaml".to_string());
        Self::new(template_path, remote_path)
    }

    /// Bind `{{NAME}}` to `value`
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(format!("{{{{{}}}}}", name), value.into());
        self
    }

    /// Resolve the template against a templates directory
    pub fn resolve(&self, templates_dir: &Path) -> PathBuf {
        templates_dir.join(&self.template_path)
    }

    /// Absolute remote path for a login user's home directory
    pub fn remote_path_in(&self, home_dir: &str) -> String {
        if self.remote_path.starts_with('/') {
            self.remote_path.clone()
        } else {
            format!("{}/{}", home_dir.trim_end_matches('/'), self.remote_path)
        }
    }
}
