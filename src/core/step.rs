//! Step domain model

use crate::core::command::RemoteCommand;
use crate::execution::retry::RetryPolicy;
use crate::manifest::ManifestTemplate;
use std::time::Duration;

/// How a command's I/O is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Buffer stdout/stderr and hand them back
    Captured,
    /// Attach the remote pty to the local terminal
    Interactive,
}

/// Run-wide switches that decide which conditional steps apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeatureSwitches {
    /// Serve the registry over plain HTTP instead of TLS
    pub plaintext_registry: bool,
}

/// Whether a step applies under the current switches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
    Always,
    PlaintextRegistry,
    TlsRegistry,
}

impl Activation {
    pub fn is_active(&self, switches: &FeatureSwitches) -> bool {
        match self {
            Activation::Always => true,
            Activation::PlaintextRegistry => switches.plaintext_registry,
            Activation::TlsRegistry => !switches.plaintext_registry,
        }
    }
}

/// What a step does
#[derive(Debug, Clone)]
pub enum StepAction {
    /// Run a single command
    Run {
        command: RemoteCommand,
        mode: ExecMode,
    },
    /// Render a template, upload it and `kubectl apply` it
    Deliver(ManifestTemplate),
    /// Poll a command until it exits zero
    WaitFor {
        command: RemoteCommand,
        policy: RetryPolicy,
    },
    /// Fixed delay, used where there is no readiness signal to poll
    Pause(Duration),
}

/// A single step in a node pipeline
#[derive(Debug, Clone)]
pub struct Step {
    /// Human-readable name, used in reports and errors
    pub name: String,

    pub action: StepAction,

    pub activation: Activation,
}

impl Step {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
            activation: Activation::Always,
        }
    }

    pub fn run(name: impl Into<String>, command: RemoteCommand) -> Self {
        Self::new(
            name,
            StepAction::Run {
                command,
                mode: ExecMode::Captured,
            },
        )
    }

    pub fn run_interactive(name: impl Into<String>, command: RemoteCommand) -> Self {
        Self::new(
            name,
            StepAction::Run {
                command,
                mode: ExecMode::Interactive,
            },
        )
    }

    pub fn deliver(name: impl Into<String>, manifest: ManifestTemplate) -> Self {
        Self::new(name, StepAction::Deliver(manifest))
    }

    pub fn wait_for(name: impl Into<String>, command: RemoteCommand, policy: RetryPolicy) -> Self {
        Self::new(name, StepAction::WaitFor { command, policy })
    }

    pub fn pause(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, StepAction::Pause(duration))
    }

    pub fn when(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    pub fn is_active(&self, switches: &FeatureSwitches) -> bool {
        self.activation.is_active(switches)
    }

    /// Whether the step only waits on remote state
    pub fn is_wait(&self) -> bool {
        matches!(self.action, StepAction::WaitFor { .. } | StepAction::Pause(_))
    }
}
