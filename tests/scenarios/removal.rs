//! Uninstall: idempotent, stops at the first failing node

use crate::helpers::*;
use k3s_installer::{ExecutionEvent, Phase, RunError, RunStatus, SchedulingStrategy};
use std::sync::Arc;

const ALL_NODES: [&str; 3] = ["10.0.0.10", "10.0.0.20", "10.0.0.21"];

#[tokio::test]
async fn test_removal_twice_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 2, false);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());
    let orchestrator = orchestrator(config, remote.clone(), SchedulingStrategy::Parallel, &events);

    for _ in 0..2 {
        let report = orchestrator.uninstall().await.unwrap();
        assert_eq!(report.status(), RunStatus::Succeeded);
        assert_eq!(report.phase(Phase::Removal).unwrap().results.len(), 3);
    }

    for host in ALL_NODES {
        assert_eq!(remote.calls_on(host).len(), 8, "{}", host);
    }
}

#[tokio::test]
async fn test_removal_never_touches_storage_server() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 2, false);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .uninstall()
        .await
        .unwrap();

    assert!(remote.calls_on("10.0.0.30").is_empty());
    let removal = remote
        .calls_on("10.0.0.20")
        .into_iter()
        .find(|c| c.describe().contains("rm -rf --"))
        .unwrap();
    assert!(removal.describe().contains("/var/lib/rancher"));
}

#[tokio::test]
async fn test_removal_stops_at_first_failing_node() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 2, false);
    let remote = MockExecutor::new();
    remote.fail_on("10.0.0.20", "k3s-uninstall");
    let events = Arc::new(EventLog::default());

    let err = orchestrator(config, remote.clone(), SchedulingStrategy::Parallel, &events)
        .uninstall()
        .await
        .unwrap_err();

    match err {
        RunError::PhaseFailed {
            phase,
            node,
            step_index,
            ..
        } => {
            assert_eq!(phase, Phase::Removal);
            assert_eq!(node, "10.0.0.20");
            assert_eq!(step_index, 1);
        }
        other => panic!("unexpected error {:?}", other),
    }
    // The failing node is not retried and later nodes are untouched
    assert_eq!(remote.calls_on("10.0.0.10").len(), 4);
    assert_eq!(remote.calls_on("10.0.0.20").len(), 2);
    assert!(remote.calls_on("10.0.0.21").is_empty());
    assert!(events.events().contains(&ExecutionEvent::PhaseCompleted {
        phase: Phase::Removal,
        failed_nodes: vec!["10.0.0.20".to_string()],
    }));
}
