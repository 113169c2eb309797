//! CLI command definitions

use crate::execution::SchedulingStrategy;
use clap::Args;

/// Remove the cluster from every node
#[derive(Debug, Args, Clone)]
pub struct UninstallCommand {
    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Validate a cluster configuration
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Print the parsed configuration as JSON, secrets redacted
    #[arg(long)]
    pub json: bool,
}

/// Scheduling strategy argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SchedulingStrategyArg {
    Sequential,
    Parallel,
    #[clap(name = "parallel-limited")]
    ParallelLimited,
}

impl SchedulingStrategyArg {
    pub fn to_strategy(self, max_parallel: usize) -> SchedulingStrategy {
        match self {
            SchedulingStrategyArg::Sequential => SchedulingStrategy::Sequential,
            SchedulingStrategyArg::Parallel => SchedulingStrategy::Parallel,
            SchedulingStrategyArg::ParallelLimited => SchedulingStrategy::LimitedParallel(max_parallel.max(1)),
        }
    }
}

/// Only an explicit `y` or `yes` confirms a destructive command
pub fn is_confirmation(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
