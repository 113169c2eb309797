//! Worker join: failures stay on the failing node

use crate::helpers::*;
use k3s_installer::{ExecutionEvent, Phase, RunError, RunStatus, SchedulingStrategy};
use std::sync::Arc;

async fn join_with_failing_second_worker(strategy: SchedulingStrategy) {
    let dir = dir_with_token();
    let config = cluster_config(dir.path(), 1, 3, false);
    let remote = MockExecutor::new();
    remote.fail_on("10.0.0.21", "is-active --quiet k3s-agent");
    let events = Arc::new(EventLog::default());

    let report = orchestrator(config, remote.clone(), strategy, &events)
        .join_workers()
        .await
        .unwrap();

    assert_eq!(
        report.status(),
        RunStatus::PartialFailure {
            failed_nodes: vec!["10.0.0.21".to_string()]
        },
        "{:?}",
        strategy
    );

    let phase = report.phase(Phase::WorkerJoin).unwrap();
    let nodes: Vec<&str> = phase.results.iter().map(|r| r.node.as_str()).collect();
    assert_eq!(nodes, vec!["10.0.0.20", "10.0.0.21", "10.0.0.22"]);
    assert!(phase.results[0].is_success());
    assert_eq!(phase.results[1].failed_step_index(), Some(1));
    assert_eq!(phase.results[1].failed_step_name(), Some("Verify k3s agent"));
    assert!(phase.results[2].is_success());

    for host in ["10.0.0.20", "10.0.0.21", "10.0.0.22"] {
        assert_eq!(remote.calls_on(host).len(), 2, "{}", host);
    }
    assert!(events.events().contains(&ExecutionEvent::PhaseCompleted {
        phase: Phase::WorkerJoin,
        failed_nodes: vec!["10.0.0.21".to_string()],
    }));
}

#[tokio::test]
async fn test_worker_failure_is_isolated_sequential() {
    join_with_failing_second_worker(SchedulingStrategy::Sequential).await;
}

#[tokio::test]
async fn test_worker_failure_is_isolated_parallel() {
    join_with_failing_second_worker(SchedulingStrategy::Parallel).await;
}

#[tokio::test]
async fn test_worker_failure_is_isolated_limited() {
    join_with_failing_second_worker(SchedulingStrategy::LimitedParallel(2)).await;
}

#[tokio::test]
async fn test_workers_join_first_master_with_stored_token() {
    let dir = dir_with_token();
    let config = cluster_config(dir.path(), 2, 2, false);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    let report = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .join_workers()
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Succeeded);
    for host in ["10.0.0.20", "10.0.0.21"] {
        let install = &remote.calls_on(host)[0];
        assert!(install.describe().contains("https://10.0.0.10:6443"));
        assert!(!install.describe().contains(TOKEN));
    }
    // Masters are not touched
    assert!(remote.calls_on("10.0.0.10").is_empty());
}

#[tokio::test]
async fn test_missing_token_file_aborts_before_any_node() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 2, false);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    let err = orchestrator(config, remote.clone(), SchedulingStrategy::Parallel, &events)
        .join_workers()
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::TokenUnavailable { .. }));
    assert!(remote.calls().is_empty());
}

#[tokio::test]
async fn test_no_workers_is_a_successful_run() {
    let dir = dir_with_token();
    let config = cluster_config(dir.path(), 1, 0, false);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    let report = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .join_workers()
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert!(remote.calls().is_empty());
}
