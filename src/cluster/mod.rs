//! Cluster orchestrator
//!
//! Builds step lists for each phase, runs them through the pipeline runner
//! and decides whether a failure ends the run. Every phase except worker join
//! runs its nodes in order and aborts on the first failing node. Worker join
//! runs every node and only records failures.

pub mod cert_manager;
pub mod control_plane;
pub mod monitoring;
pub mod registry;
pub mod removal;
pub mod storage;
pub mod workers;

use crate::core::config::ClusterConfig;
use crate::core::{JoinToken, Node, Phase, PhaseReport, PipelineOutcome, PipelineResult, RunReport};
use crate::execution::{
    retry_with_policy, ExecutionEvent, ExecutionScheduler, NodeJob, PipelineRunner, SchedulingStrategy,
    SharedReporter, StepError, StepExecutor,
};
use crate::manifest::ManifestDelivery;
use crate::remote::RemoteExecutor;
use control_plane::JoinTarget;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Fetch token, write token, fetch kubeconfig, write kubeconfig
const CREDENTIAL_STEPS: usize = 4;

/// Errors that end a run
#[derive(Debug, Error)]
pub enum RunError {
    #[error("no control-plane node configured")]
    NoControlPlane,

    #[error("{phase} aborted: {node} failed at step {step_index} ({step_name}): {source}")]
    PhaseFailed {
        phase: Phase,
        node: String,
        step_index: usize,
        step_name: String,
        #[source]
        source: StepError,
    },

    #[error("could not load join token from {path}: {source}")]
    TokenUnavailable {
        path: PathBuf,
        #[source]
        source: StepError,
    },

    #[error("could not list templates in {path}: {source}")]
    TemplatesUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A top-level installer routine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routine {
    FullInstall,
    ControlPlane,
    Workers,
    SharedStorage,
    CertManager,
    StorageProvisioner,
    Registry,
    Monitoring,
    Uninstall,
}

impl fmt::Display for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Routine::FullInstall => "full install",
            Routine::ControlPlane => "control plane",
            Routine::Workers => "workers",
            Routine::SharedStorage => "NFS export",
            Routine::CertManager => "cert-manager",
            Routine::StorageProvisioner => "NFS provisioner",
            Routine::Registry => "container registry",
            Routine::Monitoring => "monitoring",
            Routine::Uninstall => "uninstall",
        };
        f.write_str(name)
    }
}

/// Drives installer routines against the configured nodes
pub struct ClusterOrchestrator<E: ?Sized> {
    config: ClusterConfig,
    runner: Arc<PipelineRunner<E>>,
    scheduler: ExecutionScheduler,
    reporter: SharedReporter,
    /// Serializes writes to the token file and kubeconfig
    artifact_lock: Mutex<()>,
}

impl<E: RemoteExecutor + ?Sized + 'static> ClusterOrchestrator<E> {
    pub fn new(config: ClusterConfig, remote: Arc<E>, strategy: SchedulingStrategy, reporter: SharedReporter) -> Self {
        let delivery = ManifestDelivery::new(config.templates_dir.clone());
        let runner = PipelineRunner::new(StepExecutor::new(remote, delivery), config.switches(), reporter.clone());

        Self {
            config,
            runner: Arc::new(runner),
            scheduler: ExecutionScheduler::new(strategy),
            reporter,
            artifact_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub async fn install_full(&self) -> Result<RunReport, RunError> {
        self.run(Routine::FullInstall).await
    }

    /// Install the first server, fetch credentials, then join the remaining servers
    pub async fn bootstrap_control_plane(&self) -> Result<RunReport, RunError> {
        self.run(Routine::ControlPlane).await
    }

    pub async fn join_workers(&self) -> Result<RunReport, RunError> {
        self.run(Routine::Workers).await
    }

    pub async fn mount_shared_storage(&self) -> Result<RunReport, RunError> {
        self.run(Routine::SharedStorage).await
    }

    pub async fn install_cert_manager(&self) -> Result<RunReport, RunError> {
        self.run(Routine::CertManager).await
    }

    pub async fn install_nfs_provisioner(&self) -> Result<RunReport, RunError> {
        self.run(Routine::StorageProvisioner).await
    }

    pub async fn install_registry(&self) -> Result<RunReport, RunError> {
        self.run(Routine::Registry).await
    }

    pub async fn install_monitoring(&self) -> Result<RunReport, RunError> {
        self.run(Routine::Monitoring).await
    }

    pub async fn uninstall(&self) -> Result<RunReport, RunError> {
        self.run(Routine::Uninstall).await
    }

    /// Run a routine. Phases run strictly in order.
    pub async fn run(&self, routine: Routine) -> Result<RunReport, RunError> {
        let mut report = RunReport::new();
        info!(run_id = %report.run_id, routine = %routine, "Starting run");

        match routine {
            Routine::FullInstall => {
                self.control_plane_phases(&mut report).await?;
                self.worker_phase(&mut report).await?;
                self.shared_storage_phase(&mut report).await?;
                self.cert_manager_phase(&mut report).await?;
                self.provisioner_phase(&mut report).await?;
                self.registry_phase(&mut report).await?;
                self.monitoring_phase(&mut report).await?;
            }
            Routine::ControlPlane => self.control_plane_phases(&mut report).await?,
            Routine::Workers => self.worker_phase(&mut report).await?,
            Routine::SharedStorage => self.shared_storage_phase(&mut report).await?,
            Routine::CertManager => self.cert_manager_phase(&mut report).await?,
            Routine::StorageProvisioner => self.provisioner_phase(&mut report).await?,
            Routine::Registry => self.registry_phase(&mut report).await?,
            Routine::Monitoring => self.monitoring_phase(&mut report).await?,
            Routine::Uninstall => self.removal_phase(&mut report).await?,
        }

        report.complete();
        info!(run_id = %report.run_id, status = ?report.status(), "Run finished");
        Ok(report)
    }

    fn primary(&self) -> Result<Node, RunError> {
        self.config.primary_control_plane().ok_or(RunError::NoControlPlane)
    }

    async fn control_plane_phases(&self, report: &mut RunReport) -> Result<(), RunError> {
        let masters = self.config.control_plane_nodes();
        let (first, rest) = masters.split_first().ok_or(RunError::NoControlPlane)?;
        let version = self.config.k3s_version.as_str();
        let domain = self.config.domain.as_str();

        let steps = control_plane::control_plane_steps(first, version, domain, !rest.is_empty(), None);
        self.run_phase(Phase::ControlPlaneBootstrap, vec![(first.clone(), steps)], report)
            .await?;

        let token = self.propagate_credentials(first, report).await?;

        if !rest.is_empty() {
            let target = JoinTarget {
                server_address: first.address.clone(),
                token,
            };
            let jobs = rest
                .iter()
                .map(|node| {
                    let steps = control_plane::control_plane_steps(node, version, domain, true, Some(&target));
                    (node.clone(), steps)
                })
                .collect();
            self.run_phase(Phase::ControlPlaneJoin, jobs, report).await?;
        }
        Ok(())
    }

    /// Fetch the join token and kubeconfig from the first server and store them locally
    async fn propagate_credentials(&self, first: &Node, report: &mut RunReport) -> Result<JoinToken, RunError> {
        let phase = Phase::CredentialPropagation;
        self.reporter.report(ExecutionEvent::PhaseStarted { phase, nodes: 1 });

        let mut result = PipelineResult::new(first);
        let fetched = {
            let _guard = self.artifact_lock.lock().await;
            self.fetch_credentials(first, &mut result).await
        };
        result.completed_at = chrono::Utc::now();
        self.reporter.report(ExecutionEvent::PipelineCompleted {
            node: first.address.clone(),
            success: fetched.is_ok(),
        });

        match fetched {
            Ok(token) => {
                self.finish_phase(
                    PhaseReport {
                        phase,
                        results: vec![result],
                    },
                    report,
                )?;
                Ok(token)
            }
            Err((step_index, step_name, error)) => {
                self.reporter.report(ExecutionEvent::PhaseCompleted {
                    phase,
                    failed_nodes: vec![first.address.clone()],
                });
                Err(RunError::PhaseFailed {
                    phase,
                    node: first.address.clone(),
                    step_index,
                    step_name,
                    source: error,
                })
            }
        }
    }

    async fn fetch_credentials(
        &self,
        first: &Node,
        result: &mut PipelineResult,
    ) -> Result<JoinToken, (usize, String, StepError)> {
        let remote = self.runner.executor().remote();
        let policy = self.config.retry.token.to_policy();
        let read_token = control_plane::read_token_command();
        let read_token = &read_token;
        let token_path = self.config.k3s_token_file.as_path();
        let kubeconfig_path = self.config.kubeconfig_path();

        let token = self
            .tracked(first, result, "Fetch join token", true, async {
                retry_with_policy(&policy, "Fetch join token", move || async move {
                    let output = remote.run(first, read_token).await?;
                    JoinToken::parse(&output.stdout).map_err(StepError::from)
                })
                .await
            })
            .await?;

        let mut contents = token.expose().to_string();
        contents.push('\n');
        self.tracked(
            first,
            result,
            "Write join token",
            false,
            write_artifact(token_path, contents.as_bytes(), false),
        )
        .await?;

        let kubeconfig = self
            .tracked(first, result, "Fetch kubeconfig", false, async {
                Ok(remote.download(first, control_plane::KUBECONFIG_PATH).await?)
            })
            .await?;

        let rewritten = control_plane::rewrite_kubeconfig(&String::from_utf8_lossy(&kubeconfig), &first.address);
        self.tracked(
            first,
            result,
            "Write kubeconfig",
            false,
            write_artifact(&kubeconfig_path, rewritten.as_bytes(), true),
        )
        .await?;

        info!(
            token_file = %token_path.display(),
            kubeconfig = %kubeconfig_path.display(),
            "Stored join token and kubeconfig"
        );
        Ok(token)
    }

    /// Run and report a step that is not part of a step list
    async fn tracked<T, F>(
        &self,
        node: &Node,
        result: &mut PipelineResult,
        name: &str,
        waiting: bool,
        work: F,
    ) -> Result<T, (usize, String, StepError)>
    where
        F: std::future::Future<Output = Result<T, StepError>>,
    {
        let index = result.executed.len();
        result.executed.push(name.to_string());
        self.reporter.report(ExecutionEvent::StepStarted {
            node: node.address.clone(),
            step_index: index,
            step_count: CREDENTIAL_STEPS,
            step_name: name.to_string(),
            waiting,
        });

        match work.await {
            Ok(value) => {
                self.reporter.report(ExecutionEvent::StepSucceeded {
                    node: node.address.clone(),
                    step_name: name.to_string(),
                });
                Ok(value)
            }
            Err(e) => {
                warn!(host = %node.address, step = name, error = %e, "Step failed");
                self.reporter.report(ExecutionEvent::StepFailed {
                    node: node.address.clone(),
                    step_name: name.to_string(),
                    error: e.to_string(),
                });
                Err((index, name.to_string(), e))
            }
        }
    }

    async fn worker_phase(&self, report: &mut RunReport) -> Result<(), RunError> {
        let first = self.primary()?;
        let workers = self.config.worker_nodes();
        if workers.is_empty() {
            info!("No worker nodes configured");
        }

        let path = self.config.k3s_token_file.clone();
        let token = load_token(&path)
            .await
            .map_err(|source| RunError::TokenUnavailable { path, source })?;

        let jobs = workers
            .into_iter()
            .map(|node| {
                let steps = workers::worker_steps(&first.address, &token, &self.config.k3s_version);
                (node, steps)
            })
            .collect();
        self.run_phase(Phase::WorkerJoin, jobs, report).await
    }

    async fn shared_storage_phase(&self, report: &mut RunReport) -> Result<(), RunError> {
        let node = self.config.storage_node();
        let steps = storage::export_steps(&self.config.nfs);
        self.run_phase(Phase::SharedStorage, vec![(node, steps)], report).await
    }

    async fn cert_manager_phase(&self, report: &mut RunReport) -> Result<(), RunError> {
        let first = self.primary()?;
        let steps = cert_manager::cert_manager_steps(
            &self.config.email,
            &self.config.cluster_issuer_name,
            self.config.retry.rollout.to_policy(),
        );
        self.run_phase(Phase::CertificateIssuance, vec![(first, steps)], report).await
    }

    async fn provisioner_phase(&self, report: &mut RunReport) -> Result<(), RunError> {
        let first = self.primary()?;
        let steps = storage::provisioner_steps(&self.config.nfs);
        self.run_phase(Phase::StorageProvisioner, vec![(first, steps)], report).await
    }

    async fn registry_phase(&self, report: &mut RunReport) -> Result<(), RunError> {
        let first = self.primary()?;
        let steps = registry::registry_steps(&first, &self.config.docker_registry);
        self.run_phase(Phase::Registry, vec![(first, steps)], report).await?;
        info!(hint = %registry::login_hint(&self.config.docker_registry), "Registry ready");
        Ok(())
    }

    async fn monitoring_phase(&self, report: &mut RunReport) -> Result<(), RunError> {
        let first = self.primary()?;
        let templates = &self.config.templates_dir;
        let crds = monitoring::list_crds(templates, &self.config.k3s_version).map_err(|source| {
            RunError::TemplatesUnreadable {
                path: templates.join(monitoring::crd_dir(&self.config.k3s_version)),
                source,
            }
        })?;
        if crds.is_empty() {
            warn!(version = %self.config.k3s_version, "No monitoring CRDs found");
        }

        let steps = monitoring::monitoring_steps(
            &crds,
            Duration::from_secs(self.config.crd_settle_secs),
            Duration::from_secs(self.config.monitoring_settle_secs),
        );
        self.run_phase(Phase::Monitoring, vec![(first, steps)], report).await
    }

    async fn removal_phase(&self, report: &mut RunReport) -> Result<(), RunError> {
        let export_dir = self.config.nfs.nfs_root_path.as_str();
        let jobs = self
            .config
            .control_plane_nodes()
            .into_iter()
            .chain(self.config.worker_nodes())
            .map(|node| (node, removal::removal_steps(export_dir)))
            .collect();
        self.run_phase(Phase::Removal, jobs, report).await
    }

    async fn run_phase(&self, phase: Phase, jobs: Vec<NodeJob>, report: &mut RunReport) -> Result<(), RunError> {
        info!(phase = %phase, nodes = jobs.len(), "Starting phase");
        self.reporter.report(ExecutionEvent::PhaseStarted {
            phase,
            nodes: jobs.len(),
        });

        let results = if phase.aborts_run() {
            let mut results = Vec::with_capacity(jobs.len());
            for (node, steps) in &jobs {
                let result = self.runner.run(node, steps).await;
                let failed = !result.is_success();
                results.push(result);
                if failed {
                    break;
                }
            }
            results
        } else {
            self.scheduler.run_all(&self.runner, jobs).await
        };

        self.finish_phase(PhaseReport { phase, results }, report)
    }

    fn finish_phase(&self, phase_report: PhaseReport, report: &mut RunReport) -> Result<(), RunError> {
        let phase = phase_report.phase;
        let failed_nodes = phase_report.failed_nodes();
        self.reporter.report(ExecutionEvent::PhaseCompleted {
            phase,
            failed_nodes: failed_nodes.clone(),
        });

        if failed_nodes.is_empty() {
            info!(phase = %phase, "Phase complete");
        } else if phase.aborts_run() {
            if let Some(failure) = phase_report.into_first_failure() {
                if let PipelineOutcome::Failed {
                    step_index,
                    step_name,
                    error,
                } = failure.outcome
                {
                    return Err(RunError::PhaseFailed {
                        phase,
                        node: failure.node,
                        step_index,
                        step_name,
                        source: error,
                    });
                }
            }
            return Ok(());
        } else {
            warn!(phase = %phase, failed = ?failed_nodes, "Phase finished with failed nodes");
        }

        report.push(phase_report);
        Ok(())
    }
}

/// Read and validate the local join token file
async fn load_token(path: &Path) -> Result<JoinToken, StepError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StepError::LocalIo {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(JoinToken::parse(&raw)?)
}

/// Write a local artifact readable only by the current user
async fn write_artifact(path: &Path, contents: &[u8], private_parent: bool) -> Result<(), StepError> {
    use std::os::unix::fs::PermissionsExt;

    let io_err = |source: std::io::Error| StepError::LocalIo {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        if private_parent {
            builder.mode(0o700);
        }
        builder.create(parent).await.map_err(io_err)?;
    }

    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .await
        .map_err(io_err)?;
    // An existing file keeps its mode on open
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .await
        .map_err(io_err)?;
    file.write_all(contents).await.map_err(io_err)?;
    file.flush().await.map_err(io_err)?;
    Ok(())
}
