//! Fan-out of node pipelines across a set of nodes

use crate::core::{Node, PipelineOutcome, PipelineResult, Step};
use crate::execution::{PipelineRunner, StepError};
use crate::remote::RemoteExecutor;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::error;

/// How independent node pipelines are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulingStrategy {
    /// One node after another, in config order
    #[default]
    Sequential,

    /// Every node at once
    Parallel,

    /// At most N nodes at once
    LimitedParallel(usize),
}

/// One node and the steps to run on it
pub type NodeJob = (Node, Vec<Step>);

/// Runs independent node pipelines according to a strategy
pub struct ExecutionScheduler {
    strategy: SchedulingStrategy,
}

impl ExecutionScheduler {
    pub fn new(strategy: SchedulingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> SchedulingStrategy {
        self.strategy
    }

    /// Run every job and return results in job order.
    ///
    /// A failing pipeline never cancels its siblings; each node's steps stay ordered.
    pub async fn run_all<E>(&self, runner: &Arc<PipelineRunner<E>>, jobs: Vec<NodeJob>) -> Vec<PipelineResult>
    where
        E: RemoteExecutor + ?Sized + 'static,
    {
        match self.strategy {
            SchedulingStrategy::Sequential => {
                let mut results = Vec::with_capacity(jobs.len());
                for (node, steps) in &jobs {
                    results.push(runner.run(node, steps).await);
                }
                results
            }
            SchedulingStrategy::Parallel => Self::run_concurrent(runner, jobs, None).await,
            SchedulingStrategy::LimitedParallel(max) => Self::run_concurrent(runner, jobs, Some(max.max(1))).await,
        }
    }

    async fn run_concurrent<E>(
        runner: &Arc<PipelineRunner<E>>,
        jobs: Vec<NodeJob>,
        limit: Option<usize>,
    ) -> Vec<PipelineResult>
    where
        E: RemoteExecutor + ?Sized + 'static,
    {
        let permits = limit.map(|n| Arc::new(Semaphore::new(n)));
        let mut set = JoinSet::new();
        let mut slots: Vec<Option<PipelineResult>> = Vec::new();
        let mut fallback: Vec<(Node, String)> = Vec::new();

        for (index, (node, steps)) in jobs.into_iter().enumerate() {
            slots.push(None);
            let first_step = steps.first().map(|s| s.name.clone()).unwrap_or_default();
            fallback.push((node.clone(), first_step));
            let runner = runner.clone();
            let permits = permits.clone();
            set.spawn(async move {
                let _permit = match &permits {
                    Some(semaphore) => semaphore.clone().acquire_owned().await.ok(),
                    None => None,
                };
                (index, runner.run(&node, &steps).await)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => error!(error = %e, "Node pipeline task panicked"),
            }
        }

        // A node without a result counts as failed, never as skipped
        slots
            .into_iter()
            .zip(fallback)
            .map(|(slot, (node, first_step))| {
                slot.unwrap_or_else(|| {
                    error!(host = %node.address, "No result for node");
                    let mut result = PipelineResult::new(&node);
                    result.outcome = PipelineOutcome::Failed {
                        step_index: 0,
                        step_name: first_step,
                        error: StepError::Aborted("task panicked before finishing".to_string()),
                    };
                    result
                })
            })
            .collect()
    }
}

impl Default for ExecutionScheduler {
    fn default() -> Self {
        Self::new(SchedulingStrategy::default())
    }
}
