//! Step execution, node pipelines and their scheduling

pub mod engine;
pub mod events;
pub mod executor;
pub mod retry;
pub mod scheduler;

pub use engine::PipelineRunner;
pub use events::{ExecutionEvent, Reporter, SharedReporter, SilentReporter};
pub use executor::{StepError, StepExecutor};
pub use retry::{retry_with_policy, Backoff, RetryPolicy};
pub use scheduler::{ExecutionScheduler, NodeJob, SchedulingStrategy};
