//! Execution state models

use crate::core::node::{Node, NodeRole};
use crate::execution::StepError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Named stage of an orchestration run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    ControlPlaneBootstrap,
    CredentialPropagation,
    ControlPlaneJoin,
    WorkerJoin,
    SharedStorage,
    CertificateIssuance,
    StorageProvisioner,
    Registry,
    Monitoring,
    Removal,
}

impl Phase {
    /// Whether a node failure in this phase aborts the whole run
    pub fn aborts_run(&self) -> bool {
        !matches!(self, Phase::WorkerJoin)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ControlPlaneBootstrap => "control-plane bootstrap",
            Phase::CredentialPropagation => "credential propagation",
            Phase::ControlPlaneJoin => "control-plane join",
            Phase::WorkerJoin => "worker join",
            Phase::SharedStorage => "shared storage export",
            Phase::CertificateIssuance => "certificate issuance",
            Phase::StorageProvisioner => "storage provisioner",
            Phase::Registry => "container registry",
            Phase::Monitoring => "monitoring",
            Phase::Removal => "removal",
        };
        f.write_str(name)
    }
}

/// How a node pipeline ended
#[derive(Debug)]
pub enum PipelineOutcome {
    Succeeded,
    Failed {
        /// Zero-based index into the full step list
        step_index: usize,
        step_name: String,
        error: StepError,
    },
}

/// Outcome of running an ordered list of steps against one node
#[derive(Debug)]
pub struct PipelineResult {
    /// Node address
    pub node: String,

    pub role: NodeRole,

    pub outcome: PipelineOutcome,

    /// Names of steps that ran, in order (includes the failing one)
    pub executed: Vec<String>,

    /// Names of steps whose activation did not apply
    pub skipped: Vec<String>,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,
}

impl PipelineResult {
    pub fn new(node: &Node) -> Self {
        let now = Utc::now();
        Self {
            node: node.address.clone(),
            role: node.role,
            outcome: PipelineOutcome::Succeeded,
            executed: Vec::new(),
            skipped: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PipelineOutcome::Succeeded)
    }

    /// Index of the failing step, if any
    pub fn failed_step_index(&self) -> Option<usize> {
        match &self.outcome {
            PipelineOutcome::Failed { step_index, .. } => Some(*step_index),
            PipelineOutcome::Succeeded => None,
        }
    }

    pub fn failed_step_name(&self) -> Option<&str> {
        match &self.outcome {
            PipelineOutcome::Failed { step_name, .. } => Some(step_name),
            PipelineOutcome::Succeeded => None,
        }
    }

    pub fn error(&self) -> Option<&StepError> {
        match &self.outcome {
            PipelineOutcome::Failed { error, .. } => Some(error),
            PipelineOutcome::Succeeded => None,
        }
    }
}

/// Results of every node pipeline a phase ran
#[derive(Debug)]
pub struct PhaseReport {
    pub phase: Phase,
    pub results: Vec<PipelineResult>,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            results: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.results.iter().all(PipelineResult::is_success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PipelineResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn failed_nodes(&self) -> Vec<String> {
        self.failures().map(|r| r.node.clone()).collect()
    }

    /// Take the first failed pipeline out of the report
    pub fn into_first_failure(self) -> Option<PipelineResult> {
        self.results.into_iter().find(|r| !r.is_success())
    }
}

/// Overall status of a finished run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Succeeded,
    /// Isolated pipelines failed; everything else completed
    PartialFailure { failed_nodes: Vec<String> },
}

/// Report of a run that was not aborted
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub phases: Vec<PhaseReport>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            phases: Vec::new(),
        }
    }

    pub fn push(&mut self, phase: PhaseReport) {
        self.phases.push(phase);
    }

    pub fn phase(&self, phase: Phase) -> Option<&PhaseReport> {
        self.phases.iter().find(|p| p.phase == phase)
    }

    pub fn complete(&mut self) {
        self.completed_at = Some(Utc::now());
    }

    pub fn status(&self) -> RunStatus {
        let failed_nodes: Vec<String> = self
            .phases
            .iter()
            .flat_map(PhaseReport::failed_nodes)
            .collect();

        if failed_nodes.is_empty() {
            RunStatus::Succeeded
        } else {
            RunStatus::PartialFailure { failed_nodes }
        }
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
