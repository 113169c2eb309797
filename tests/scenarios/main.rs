//! Scenario tests: orchestrator routines against a scripted remote executor

mod helpers;

mod auxiliary;
mod registry;
mod removal;
mod workers;
