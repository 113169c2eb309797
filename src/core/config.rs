//! Cluster configuration from JSON or YAML

use crate::core::node::{Credentials, Node, NodeRole, Secret};
use crate::core::step::FeatureSwitches;
use crate::execution::retry::RetryPolicy;
use crate::remote::HostKeyPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One SSH-reachable node as written in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub ip: String,

    pub ssh_user: String,

    pub ssh_pass: Secret,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    /// Expected host key fingerprint (`SHA256:...`), required by the `pinned` policy
    #[serde(default)]
    pub host_key_fingerprint: Option<String>,
}

/// NFS server and export settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NfsConfig {
    pub nfs_server: String,

    pub nfs_user: String,

    pub nfs_pass: Secret,

    #[serde(default)]
    pub nfs_ssh_port: Option<u16>,

    /// Directory exported to the cluster
    pub nfs_root_path: String,

    /// Client network allowed to mount the export
    pub network_cidr: String,

    #[serde(alias = "export-docker-registry")]
    pub export_docker_registry: String,

    #[serde(alias = "export-grafana")]
    pub export_grafana: String,

    /// Capacity of each persistent volume (e.g. "10Gi")
    pub capacity: String,
}

/// Private container registry settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub url: String,

    #[serde(alias = "pvc_storagy_capacity")]
    pub pvc_storage_capacity: String,

    pub user: String,

    pub pass: Secret,

    /// Serve over plain HTTP (no TLS certificate)
    #[serde(default)]
    pub local: bool,
}

/// SSH transport settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshSettings {
    #[serde(default)]
    pub host_key_policy: HostKeyPolicy,

    /// known_hosts file; defaults to `~/.ssh/known_hosts`
    #[serde(default)]
    pub known_hosts_path: Option<PathBuf>,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_path: None,
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

/// Polling policy as written in the config file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,

    pub delay_secs: u64,

    #[serde(default)]
    pub backoff_multiplier: Option<f64>,

    #[serde(default)]
    pub max_delay_secs: Option<u64>,
}

impl RetrySettings {
    pub fn to_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::fixed(self.max_attempts, Duration::from_secs(self.delay_secs));
        match self.backoff_multiplier {
            Some(multiplier) => policy.with_backoff(
                multiplier,
                Duration::from_secs(self.max_delay_secs.unwrap_or(60)),
            ),
            None => policy,
        }
    }
}

/// Polling policies for the remote conditions the installer waits on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfigs {
    /// Join token availability after the server starts
    #[serde(default = "default_token_retry")]
    pub token: RetrySettings,

    /// Deployment rollouts (cert-manager webhook)
    #[serde(default = "default_rollout_retry")]
    pub rollout: RetrySettings,
}

impl Default for RetryConfigs {
    fn default() -> Self {
        Self {
            token: default_token_retry(),
            rollout: default_rollout_retry(),
        }
    }
}

/// Top-level installer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// k3s release to install; empty means the installer's default channel
    #[serde(default)]
    pub k3s_version: String,

    pub masters: Vec<NodeConfig>,

    #[serde(default)]
    pub workers: Vec<NodeConfig>,

    /// Local file the join token is written to
    pub k3s_token_file: PathBuf,

    /// Local kubeconfig destination; defaults to `~/.kube/config`
    #[serde(default)]
    pub kubeconfig_path: Option<PathBuf>,

    /// Directory holding the manifest templates
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,

    pub nfs: NfsConfig,

    pub docker_registry: RegistryConfig,

    pub email: String,

    pub domain: String,

    pub cluster_issuer_name: String,

    #[serde(default)]
    pub ssh: SshSettings,

    #[serde(default)]
    pub retry: RetryConfigs,

    /// Wait after applying CRDs so the API server registers them
    #[serde(default = "default_crd_settle")]
    pub crd_settle_secs: u64,

    /// Wait before patching the monitoring operator
    #[serde(default = "default_monitoring_settle")]
    pub monitoring_settle_secs: u64,
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("templates")
}

fn default_token_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 10,
        delay_secs: 5,
        backoff_multiplier: None,
        max_delay_secs: None,
    }
}

fn default_rollout_retry() -> RetrySettings {
    RetrySettings {
        max_attempts: 12,
        delay_secs: 5,
        backoff_multiplier: None,
        max_delay_secs: None,
    }
}

fn default_crd_settle() -> u64 {
    10
}

fn default_monitoring_settle() -> u64 {
    20
}

impl ClusterConfig {
    /// Load configuration from a file; `.yaml`/`.yml` are parsed as YAML, anything else as JSON
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("could not open config file {}", path.display()))?;

        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ClusterConfig = serde_json::from_str(json).context("could not decode JSON")?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: ClusterConfig = serde_yaml::from_str(yaml).context("could not decode YAML")?;
        config.validate()?;
        Ok(config)
    }

    /// Check that every required field is present and usable
    pub fn validate(&self) -> Result<()> {
        if self.masters.is_empty() {
            anyhow::bail!("masters must contain at least one node");
        }

        for (group, nodes) in [("masters", &self.masters), ("workers", &self.workers)] {
            for (i, node) in nodes.iter().enumerate() {
                validate_node(group, i, node, &self.ssh.host_key_policy)?;
            }
        }

        require("k3s_token_file", &self.k3s_token_file.to_string_lossy())?;

        require("nfs.nfs_server", &self.nfs.nfs_server)?;
        validate_address("nfs.nfs_server", &self.nfs.nfs_server)?;
        require("nfs.nfs_user", &self.nfs.nfs_user)?;
        require("nfs.nfs_pass", self.nfs.nfs_pass.expose())?;
        require("nfs.nfs_root_path", &self.nfs.nfs_root_path)?;
        require("nfs.network_cidr", &self.nfs.network_cidr)?;
        require("nfs.export_docker_registry", &self.nfs.export_docker_registry)?;
        require("nfs.export_grafana", &self.nfs.export_grafana)?;
        require("nfs.capacity", &self.nfs.capacity)?;

        require("docker_registry.url", &self.docker_registry.url)?;
        require(
            "docker_registry.pvc_storage_capacity",
            &self.docker_registry.pvc_storage_capacity,
        )?;
        require("docker_registry.user", &self.docker_registry.user)?;
        require("docker_registry.pass", self.docker_registry.pass.expose())?;

        require("email", &self.email)?;
        require("domain", &self.domain)?;
        require("cluster_issuer_name", &self.cluster_issuer_name)?;

        for (name, settings) in [("retry.token", &self.retry.token), ("retry.rollout", &self.retry.rollout)] {
            if settings.max_attempts == 0 {
                anyhow::bail!("{}.max_attempts must be at least 1", name);
            }
            if let Some(multiplier) = settings.backoff_multiplier {
                if !multiplier.is_finite() || multiplier <= 0.0 {
                    anyhow::bail!("{}.backoff_multiplier must be positive", name);
                }
            }
        }

        Ok(())
    }

    /// Control-plane nodes in config order
    pub fn control_plane_nodes(&self) -> Vec<Node> {
        self.masters
            .iter()
            .map(|n| to_node(n, NodeRole::ControlPlane))
            .collect()
    }

    pub fn worker_nodes(&self) -> Vec<Node> {
        self.workers
            .iter()
            .map(|n| to_node(n, NodeRole::Worker))
            .collect()
    }

    /// The node every cluster-level manifest is applied on
    pub fn primary_control_plane(&self) -> Option<Node> {
        self.masters.first().map(|n| to_node(n, NodeRole::ControlPlane))
    }

    /// The NFS server, reached with its own credentials
    pub fn storage_node(&self) -> Node {
        Node::new(
            self.nfs.nfs_server.clone(),
            Credentials {
                username: self.nfs.nfs_user.clone(),
                password: self.nfs.nfs_pass.clone(),
            },
            NodeRole::StorageServer,
        )
        .with_port(self.nfs.nfs_ssh_port.unwrap_or(22))
    }

    pub fn switches(&self) -> FeatureSwitches {
        FeatureSwitches {
            plaintext_registry: self.docker_registry.local,
        }
    }

    /// Local kubeconfig destination
    pub fn kubeconfig_path(&self) -> PathBuf {
        self.kubeconfig_path.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".kube")
                .join("config")
        })
    }
}

fn to_node(config: &NodeConfig, role: NodeRole) -> Node {
    let node = Node::new(
        config.ip.clone(),
        Credentials {
            username: config.ssh_user.clone(),
            password: config.ssh_pass.clone(),
        },
        role,
    )
    .with_port(config.ssh_port);

    match &config.host_key_fingerprint {
        Some(fingerprint) => node.with_fingerprint(fingerprint.clone()),
        None => node,
    }
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{} must not be empty", field);
    }
    Ok(())
}

fn validate_node(group: &str, index: usize, node: &NodeConfig, policy: &HostKeyPolicy) -> Result<()> {
    let field = |name: &str| format!("{}[{}].{}", group, index, name);

    require(&field("ip"), &node.ip)?;
    validate_address(&field("ip"), &node.ip)?;
    require(&field("ssh_user"), &node.ssh_user)?;
    require(&field("ssh_pass"), node.ssh_pass.expose())?;

    if *policy == HostKeyPolicy::Pinned && node.host_key_fingerprint.is_none() {
        anyhow::bail!(
            "{} is required when ssh.host_key_policy is \"pinned\"",
            field("host_key_fingerprint")
        );
    }
    Ok(())
}

/// Addresses end up in remote commands, API URLs and kubeconfig rewrites,
/// so only hostname and IPv4 characters are accepted
fn validate_address(field: &str, address: &str) -> Result<()> {
    if address.contains(':') {
        anyhow::bail!("{} must be a hostname or IPv4 address, IPv6 is not supported: {:?}", field, address);
    }
    let valid = address
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-'));
    if !valid {
        anyhow::bail!("{} is not a valid hostname or IP address: {:?}", field, address);
    }
    Ok(())
}
