//! Container registry: plaintext and TLS variants

use crate::helpers::*;
use k3s_installer::execution::StepError;
use k3s_installer::manifest::DeliveryError;
use k3s_installer::{ClusterConfig, Phase, RunError, RunStatus, SchedulingStrategy};
use std::sync::Arc;

fn registry_templates(config: &ClusterConfig) {
    for name in [
        "config_without_tls.yaml",
        "service_without_tls.yaml",
        "deployment_without_tls.yaml",
        "service.yaml",
        "deployment.yaml",
    ] {
        write_template(config, &format!("docker-registry/{}", name), "kind: Template\n");
    }
    write_template(
        config,
        "docker-registry/pvc-localhost.yaml",
        "storage: {{PVC_Storage_Capacity}}\n",
    );
    for name in ["ingress_without_tls.yaml", "ingress.yaml", "domain-tls-certificate.yaml"] {
        write_template(
            config,
            &format!("docker-registry/{}", name),
            "host: {{DOCKER_REGISTRY_URL}}\n",
        );
    }
}

fn uploaded_names(remote: &MockExecutor) -> Vec<String> {
    remote
        .uploads()
        .into_iter()
        .map(|(path, _)| path.rsplit('/').next().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_plaintext_registry() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, true);
    registry_templates(&config);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    let report = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_registry()
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(
        uploaded_names(&remote),
        vec![
            "docker-registry-pvc-localhost.yaml",
            "config_without_tls.yaml",
            "docker-registry-service.yaml",
            "docker-registry-ingress.yaml",
            "deployment.yaml",
        ]
    );

    let phase = report.phase(Phase::Registry).unwrap();
    assert_eq!(phase.results[0].skipped.len(), 4);
    assert!(phase.results[0]
        .skipped
        .contains(&"Apply registry domain certificate".to_string()));
}

#[tokio::test]
async fn test_tls_registry() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, false);
    registry_templates(&config);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_registry()
        .await
        .unwrap();

    let names = uploaded_names(&remote);
    assert!(names.contains(&"docker-registry-domain-tls-certificate.yaml".to_string()));
    assert!(!names.contains(&"config_without_tls.yaml".to_string()));
    assert_eq!(names.len(), 5);
}

#[tokio::test]
async fn test_registry_manifests_are_rendered() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, false);
    registry_templates(&config);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_registry()
        .await
        .unwrap();

    for (path, contents) in remote.uploads() {
        assert!(path.starts_with("/home/ubuntu/"), "{}", path);
        assert!(!contents.contains("{{"), "{}: {}", path, contents);
        if path.ends_with("docker-registry-pvc-localhost.yaml") {
            assert_eq!(contents, "storage: 5Gi\n");
        }
        if path.ends_with("docker-registry-ingress.yaml") {
            assert_eq!(contents, "host: registry.example.com\n");
        }
    }
}

#[tokio::test]
async fn test_registry_password_only_on_stdin() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, true);
    registry_templates(&config);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_registry()
        .await
        .unwrap();

    let calls = remote.calls();
    assert!(calls.iter().all(|c| !c.describe().contains("registry-pw")));
    let htpasswd_stdin = calls.iter().find_map(|c| match c {
        MockCall::Run { command, stdin, .. } if command.contains("htpasswd -i") => stdin.clone(),
        _ => None,
    });
    assert_eq!(htpasswd_stdin.as_deref(), Some("node-pw\nregistry-pw\n"));
}

#[tokio::test]
async fn test_missing_template_aborts_registry() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, true);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    let err = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_registry()
        .await
        .unwrap_err();

    match err {
        RunError::PhaseFailed {
            phase,
            step_name,
            source,
            ..
        } => {
            assert_eq!(phase, Phase::Registry);
            assert_eq!(step_name, "Apply registry volume claim");
            assert!(matches!(
                source,
                StepError::Delivery(DeliveryError::TemplateUnreadable { .. })
            ));
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(remote.uploads().is_empty());
}
