//! Progress events and the reporter that receives them

use crate::core::Phase;
use std::sync::Arc;

/// Events emitted while phases and node pipelines run
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionEvent {
    PhaseStarted {
        phase: Phase,
        nodes: usize,
    },
    StepStarted {
        node: String,
        step_index: usize,
        step_count: usize,
        step_name: String,
        /// Polling or pausing rather than doing work
        waiting: bool,
    },
    StepSkipped {
        node: String,
        step_name: String,
    },
    StepSucceeded {
        node: String,
        step_name: String,
    },
    StepFailed {
        node: String,
        step_name: String,
        error: String,
    },
    PipelineCompleted {
        node: String,
        success: bool,
    },
    PhaseCompleted {
        phase: Phase,
        failed_nodes: Vec<String>,
    },
}

/// Receives progress events. Injected into the runner and orchestrator.
pub trait Reporter: Send + Sync {
    fn report(&self, event: ExecutionEvent);
}

impl<F> Reporter for F
where
    F: Fn(ExecutionEvent) + Send + Sync,
{
    fn report(&self, event: ExecutionEvent) {
        self(event)
    }
}

pub type SharedReporter = Arc<dyn Reporter>;

/// Reporter that drops every event
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn report(&self, _event: ExecutionEvent) {}
}
