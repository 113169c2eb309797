//! CLI output formatting

use crate::cluster::{RunError, Routine};
use crate::core::{PipelineOutcome, RunReport, RunStatus};
use crate::execution::{ExecutionEvent, Reporter};
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Mutex;
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");

/// Create a spinner for a step that waits on remote state
pub fn create_spinner(multi: &MultiProgress, message: String) -> ProgressBar {
    let spinner = multi.add(ProgressBar::new_spinner());
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{elapsed}]")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message);
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

/// Prints execution events to the console. Waiting steps get a spinner.
pub struct ConsoleReporter {
    multi: MultiProgress,
    /// Active spinners keyed by node address
    spinners: Mutex<HashMap<String, ProgressBar>>,
}

impl ConsoleReporter {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            spinners: Mutex::new(HashMap::new()),
        }
    }

    fn print(&self, line: &str) {
        self.multi.suspend(|| println!("{}", line));
    }

    fn finish_spinner(&self, node: &str) {
        if let Ok(mut spinners) = self.spinners.lock() {
            if let Some(spinner) = spinners.remove(node) {
                spinner.finish_and_clear();
                self.multi.remove(&spinner);
            }
        }
    }
}

impl Default for ConsoleReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter for ConsoleReporter {
    fn report(&self, event: ExecutionEvent) {
        match &event {
            ExecutionEvent::StepStarted {
                node,
                step_index,
                step_count,
                step_name,
                waiting: true,
            } => {
                let message = format!(
                    "{} [{}/{}] {}",
                    style(node).dim(),
                    step_index + 1,
                    step_count,
                    style(step_name).cyan()
                );
                let spinner = create_spinner(&self.multi, message);
                if let Ok(mut spinners) = self.spinners.lock() {
                    if let Some(previous) = spinners.insert(node.clone(), spinner) {
                        previous.finish_and_clear();
                    }
                }
                return;
            }
            ExecutionEvent::StepSucceeded { node, .. }
            | ExecutionEvent::StepFailed { node, .. }
            | ExecutionEvent::PipelineCompleted { node, .. } => self.finish_spinner(node),
            _ => {}
        }

        if let Some(line) = format_execution_event(&event) {
            self.print(&line);
        }
    }
}

/// Format an execution event for display. Some events print nothing.
pub fn format_execution_event(event: &ExecutionEvent) -> Option<String> {
    let line = match event {
        ExecutionEvent::PhaseStarted { phase, nodes } => format!(
            "\n{} {} ({} node{})",
            ROCKET,
            style(phase).bold(),
            nodes,
            if *nodes == 1 { "" } else { "s" }
        ),
        ExecutionEvent::StepStarted {
            node,
            step_index,
            step_count,
            step_name,
            ..
        } => format!(
            "{} {} [{}/{}] {}",
            SPINNER,
            style(node).dim(),
            step_index + 1,
            step_count,
            style(step_name).cyan()
        ),
        ExecutionEvent::StepSkipped { node, step_name } => format!(
            "  {} {} {}",
            style(node).dim(),
            style(step_name).dim(),
            style("(skipped)").dim()
        ),
        ExecutionEvent::StepSucceeded { node, step_name } => {
            format!("{} {} {}", CHECK, style(node).dim(), style(step_name).green())
        }
        ExecutionEvent::StepFailed { node, step_name, error } => format!(
            "{} {} {}: {}",
            CROSS,
            style(node).dim(),
            style(step_name).red(),
            style(error).dim()
        ),
        ExecutionEvent::PipelineCompleted { .. } => return None,
        ExecutionEvent::PhaseCompleted { phase, failed_nodes } => {
            if failed_nodes.is_empty() {
                format!("{} {} {}", CHECK, style(phase).bold(), style("complete").green())
            } else {
                format!(
                    "{} {} finished with failures on {}",
                    WARN,
                    style(phase).bold(),
                    style(failed_nodes.join(", ")).red()
                )
            }
        }
    };
    Some(line)
}

/// Print the outcome of a finished run. Returns whether every node succeeded.
pub fn print_run_report(routine: Routine, report: &RunReport) -> bool {
    let elapsed = report
        .completed_at
        .and_then(|done| done.signed_duration_since(report.started_at).to_std().ok())
        .map(format_duration)
        .unwrap_or_default();

    match report.status() {
        RunStatus::Succeeded => {
            println!(
                "\n{} {} completed {} {}",
                CHECK,
                style(routine).bold(),
                style("successfully").green(),
                style(elapsed).dim()
            );
            true
        }
        RunStatus::PartialFailure { failed_nodes } => {
            println!(
                "\n{} {} finished with {} failed node{} {}",
                WARN,
                style(routine).bold(),
                style(failed_nodes.len()).red(),
                if failed_nodes.len() == 1 { "" } else { "s" },
                style(elapsed).dim()
            );
            for phase in &report.phases {
                for result in phase.failures() {
                    if let PipelineOutcome::Failed {
                        step_index,
                        step_name,
                        error,
                    } = &result.outcome
                    {
                        println!(
                            "  {} {} step {} ({}): {}",
                            CROSS,
                            style(&result.node).bold(),
                            step_index + 1,
                            style(step_name).red(),
                            format_error_chain(error)
                        );
                    }
                }
            }
            false
        }
    }
}

/// Print an error that aborted the run
pub fn print_run_error(routine: Routine, error: &RunError) {
    println!("\n{} {} {}", CROSS, style(routine).bold(), style("failed").red());
    println!("  {}", format_error_chain(error));
}

/// An error and its sources joined with `: `
pub fn format_error_chain(error: &dyn Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        // thiserror messages often already embed their source
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
