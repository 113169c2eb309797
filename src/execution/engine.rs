//! Node pipeline runner - runs ordered steps against one node, stopping at the first failure

use crate::core::{FeatureSwitches, Node, PipelineOutcome, PipelineResult, Step};
use crate::execution::events::{ExecutionEvent, SharedReporter};
use crate::execution::StepExecutor;
use crate::remote::RemoteExecutor;
use chrono::Utc;
use tracing::{error, info};

/// Runs step lists against nodes
pub struct PipelineRunner<E: ?Sized> {
    executor: StepExecutor<E>,
    switches: FeatureSwitches,
    reporter: SharedReporter,
}

impl<E: RemoteExecutor + ?Sized> PipelineRunner<E> {
    pub fn new(executor: StepExecutor<E>, switches: FeatureSwitches, reporter: SharedReporter) -> Self {
        Self {
            executor,
            switches,
            reporter,
        }
    }

    pub fn executor(&self) -> &StepExecutor<E> {
        &self.executor
    }

    pub fn reporter(&self) -> &SharedReporter {
        &self.reporter
    }

    /// Run `steps` in order against `node`.
    ///
    /// Inactive steps are recorded as skipped. The first failing step ends
    /// the pipeline; nothing after it runs and nothing before it is undone.
    pub async fn run(&self, node: &Node, steps: &[Step]) -> PipelineResult {
        let mut result = PipelineResult::new(node);
        info!(host = %node.address, role = %node.role, steps = steps.len(), "Starting pipeline");

        for (index, step) in steps.iter().enumerate() {
            if !step.is_active(&self.switches) {
                result.skipped.push(step.name.clone());
                self.reporter.report(ExecutionEvent::StepSkipped {
                    node: node.address.clone(),
                    step_name: step.name.clone(),
                });
                continue;
            }

            result.executed.push(step.name.clone());
            self.reporter.report(ExecutionEvent::StepStarted {
                node: node.address.clone(),
                step_index: index,
                step_count: steps.len(),
                step_name: step.name.clone(),
                waiting: step.is_wait(),
            });

            match self.executor.execute(node, step).await {
                Ok(()) => {
                    self.reporter.report(ExecutionEvent::StepSucceeded {
                        node: node.address.clone(),
                        step_name: step.name.clone(),
                    });
                }
                Err(e) => {
                    error!(host = %node.address, step = %step.name, error = %e, "Step failed");
                    self.reporter.report(ExecutionEvent::StepFailed {
                        node: node.address.clone(),
                        step_name: step.name.clone(),
                        error: e.to_string(),
                    });
                    result.outcome = PipelineOutcome::Failed {
                        step_index: index,
                        step_name: step.name.clone(),
                        error: e,
                    };
                    break;
                }
            }
        }

        result.completed_at = Utc::now();
        self.reporter.report(ExecutionEvent::PipelineCompleted {
            node: node.address.clone(),
            success: result.is_success(),
        });
        result
    }
}
