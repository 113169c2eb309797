//! Test utilities: a scripted remote executor and cluster configs on temp dirs

use async_trait::async_trait;
use k3s_installer::core::RemoteCommand;
use k3s_installer::execution::{ExecutionEvent, SharedReporter};
use k3s_installer::{
    ClusterConfig, ClusterOrchestrator, CommandOutput, Node, RemoteError, RemoteExecutor, SchedulingStrategy,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const TOKEN: &str = "K1075f8d2a3c2e2bbd2d1c3a1a8a7d7e2cfb1f6a1b2c3d4e5f6a7b8c9d0e1f2a3b4::server:0123456789abcdef";

pub const KUBECONFIG: &str = "apiVersion: v1\nclusters:\n- cluster:\n    server: https://127.0.0.1:6443\n";

/// One remote interaction, in the order it happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Run { host: String, command: String, stdin: Option<String> },
    Interactive { host: String, command: String },
    Upload { host: String, path: String, contents: String },
    Download { host: String, path: String },
}

impl MockCall {
    pub fn host(&self) -> &str {
        match self {
            MockCall::Run { host, .. }
            | MockCall::Interactive { host, .. }
            | MockCall::Upload { host, .. }
            | MockCall::Download { host, .. } => host,
        }
    }

    /// Command string, or `upload <path>` / `download <path>` for transfers
    pub fn describe(&self) -> String {
        match self {
            MockCall::Run { command, .. } | MockCall::Interactive { command, .. } => command.clone(),
            MockCall::Upload { path, .. } => format!("upload {}", path),
            MockCall::Download { path, .. } => format!("download {}", path),
        }
    }
}

struct Failure {
    host: Option<String>,
    needle: String,
    remaining: usize,
}

/// Remote executor that succeeds unless told otherwise
#[derive(Default)]
pub struct MockExecutor {
    calls: Mutex<Vec<MockCall>>,
    failures: Mutex<Vec<Failure>>,
    responses: Mutex<Vec<(String, String)>>,
    files: Mutex<HashMap<(String, String), Vec<u8>>>,
}

impl MockExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A control-plane host that hands out a valid token and kubeconfig
    pub fn with_control_plane(host: &str) -> Arc<Self> {
        let mock = Self::new();
        mock.respond("node-token", &format!("{}\n", TOKEN));
        mock.put_file(host, "/etc/rancher/k3s/k3s.yaml", KUBECONFIG.as_bytes());
        mock
    }

    /// Every interaction on `host` containing `needle` fails
    pub fn fail_on(&self, host: &str, needle: &str) {
        self.push_failure(Some(host), needle, usize::MAX);
    }

    /// The first `times` interactions containing `needle` fail, on any host
    pub fn fail_times(&self, needle: &str, times: usize) {
        self.push_failure(None, needle, times);
    }

    pub fn respond(&self, needle: &str, stdout: &str) {
        self.responses
            .lock()
            .unwrap()
            .push((needle.to_string(), stdout.to_string()));
    }

    pub fn put_file(&self, host: &str, path: &str, contents: &[u8]) {
        self.files
            .lock()
            .unwrap()
            .insert((host.to_string(), path.to_string()), contents.to_vec());
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_on(&self, host: &str) -> Vec<MockCall> {
        self.calls().into_iter().filter(|c| c.host() == host).collect()
    }

    /// Number of interactions containing `needle`
    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.describe().contains(needle)).count()
    }

    pub fn uploads(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Upload { path, contents, .. } => Some((path, contents)),
                _ => None,
            })
            .collect()
    }

    fn push_failure(&self, host: Option<&str>, needle: &str, remaining: usize) {
        self.failures.lock().unwrap().push(Failure {
            host: host.map(str::to_string),
            needle: needle.to_string(),
            remaining,
        });
    }

    fn record(&self, call: MockCall) -> Result<(), RemoteError> {
        let host = call.host().to_string();
        let described = call.describe();
        self.calls.lock().unwrap().push(call);

        let mut failures = self.failures.lock().unwrap();
        for failure in failures.iter_mut() {
            let host_matches = failure.host.as_deref().map_or(true, |h| h == host);
            if host_matches && failure.remaining > 0 && described.contains(&failure.needle) {
                failure.remaining -= 1;
                return Err(RemoteError::NonZeroExit {
                    host,
                    command: described,
                    status: 1,
                    stderr: "mock failure".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn run(&self, node: &Node, command: &RemoteCommand) -> Result<CommandOutput, RemoteError> {
        let shell = command.to_shell_string();
        self.record(MockCall::Run {
            host: node.address.clone(),
            command: shell.clone(),
            stdin: command.stdin_payload(node.credentials.password.expose()),
        })?;

        let responses = self.responses.lock().unwrap();
        let stdout = responses
            .iter()
            .find(|(needle, _)| shell.contains(needle.as_str()))
            .map(|(_, stdout)| stdout.clone())
            .unwrap_or_default();
        Ok(CommandOutput::stdout(stdout))
    }

    async fn run_interactive(&self, node: &Node, command: &RemoteCommand) -> Result<(), RemoteError> {
        self.record(MockCall::Interactive {
            host: node.address.clone(),
            command: command.to_shell_string(),
        })
    }

    async fn upload(&self, node: &Node, remote_path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        self.record(MockCall::Upload {
            host: node.address.clone(),
            path: remote_path.to_string(),
            contents: String::from_utf8_lossy(contents).into_owned(),
        })?;
        self.put_file(&node.address, remote_path, contents);
        Ok(())
    }

    async fn download(&self, node: &Node, remote_path: &str) -> Result<Vec<u8>, RemoteError> {
        self.record(MockCall::Download {
            host: node.address.clone(),
            path: remote_path.to_string(),
        })?;
        self.files
            .lock()
            .unwrap()
            .get(&(node.address.clone(), remote_path.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::transfer(&node.address, remote_path, "no such file"))
    }
}

/// Collects every reported event
#[derive(Default)]
pub struct EventLog {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl EventLog {
    pub fn reporter(self: &Arc<Self>) -> SharedReporter {
        let log = self.clone();
        Arc::new(move |event: ExecutionEvent| log.events.lock().unwrap().push(event))
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap().clone()
    }
}

/// Config with `masters` and `workers` nodes whose local artifacts live under `dir`
pub fn cluster_config(dir: &Path, masters: usize, workers: usize, local_registry: bool) -> ClusterConfig {
    let node = |i: usize| {
        serde_json::json!({
            "ip": format!("10.0.0.{}", i),
            "ssh_user": "ubuntu",
            "ssh_pass": "node-pw",
        })
    };
    let json = serde_json::json!({
        "k3s_version": "v1.30.4+k3s1",
        "masters": (0..masters).map(|i| node(10 + i)).collect::<Vec<_>>(),
        "workers": (0..workers).map(|i| node(20 + i)).collect::<Vec<_>>(),
        "k3s_token_file": dir.join("k3s_token.txt"),
        "kubeconfig_path": dir.join("kube").join("config"),
        "templates_dir": dir.join("templates"),
        "nfs": {
            "nfs_server": "10.0.0.30",
            "nfs_user": "storage",
            "nfs_pass": "nfs-pw",
            "nfs_root_path": "/srv/nfs/k3s",
            "network_cidr": "10.0.0.0/24",
            "export_docker_registry": "/srv/nfs/k3s/registry",
            "export_grafana": "/srv/nfs/k3s/grafana",
            "capacity": "10Gi"
        },
        "docker_registry": {
            "url": "registry.example.com",
            "pvc_storage_capacity": "5Gi",
            "user": "admin",
            "pass": "registry-pw",
            "local": local_registry
        },
        "email": "ops@example.com",
        "domain": "k3s.example.com",
        "cluster_issuer_name": "letsencrypt-prod",
        "retry": {
            "token": {"max_attempts": 3, "delay_secs": 0},
            "rollout": {"max_attempts": 2, "delay_secs": 0}
        },
        "crd_settle_secs": 0,
        "monitoring_settle_secs": 0
    });
    ClusterConfig::from_json(&json.to_string()).unwrap()
}

/// Write a template file under the config's templates directory
pub fn write_template(config: &ClusterConfig, relative: &str, contents: &str) {
    let path = config.templates_dir.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

pub fn orchestrator(
    config: ClusterConfig,
    remote: Arc<MockExecutor>,
    strategy: SchedulingStrategy,
    events: &Arc<EventLog>,
) -> ClusterOrchestrator<MockExecutor> {
    ClusterOrchestrator::new(config, remote, strategy, events.reporter())
}

/// Temp dir holding a stored join token, as left behind by a control-plane run
pub fn dir_with_token() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("k3s_token.txt"), format!("{}\n", TOKEN)).unwrap();
    dir
}
