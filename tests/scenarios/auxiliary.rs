//! NFS export, provisioner, cert-manager and monitoring routines

use crate::helpers::*;
use k3s_installer::cluster::monitoring::crd_dir;
use k3s_installer::{Phase, RunError, RunStatus, SchedulingStrategy};
use std::sync::Arc;

#[tokio::test]
async fn test_nfs_export_runs_on_storage_server() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 1, false);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    let report = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .mount_shared_storage()
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Succeeded);
    let calls = remote.calls();
    assert!(calls.iter().all(|c| c.host() == "10.0.0.30"));
    assert_eq!(calls.len(), 4);

    let export = calls
        .iter()
        .find(|c| c.describe().contains("/etc/exports"))
        .unwrap();
    assert!(export.describe().contains("rw,sync,no_subtree_check,no_root_squash"));
    assert!(export.describe().ends_with("/srv/nfs/k3s 10.0.0.0/24"));
    // sudo is fed the storage server's own password
    match export {
        MockCall::Run { stdin, .. } => assert_eq!(stdin.as_deref(), Some("nfs-pw\n")),
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn test_nfs_provisioner_manifests() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, false);
    for name in ["nfs-namespace.yaml", "nfs-rbac.yaml", "nfs-storageclass.yaml"] {
        write_template(&config, &format!("nfs/{}", name), "kind: Template\n");
    }
    write_template(
        &config,
        "nfs/nfs-deployment.yaml",
        "server: {{NFS_SERVER}}\npath: {{NFS_ROOT_PATH}}\n",
    );
    for name in ["pv-nfs-docker-registry-data.yaml", "pv-nfs-grafana-data.yaml"] {
        write_template(
            &config,
            &format!("nfs/{}", name),
            "server: {{NFS_SERVER}}\npath: {{NFS_EXPORT}}\nstorage: {{NFS_CAPACITY}}\n",
        );
    }
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_nfs_provisioner()
        .await
        .unwrap();

    let uploads = remote.uploads();
    assert_eq!(uploads.len(), 6);
    assert!(remote.calls().iter().all(|c| c.host() == "10.0.0.10"));
    let grafana = uploads
        .iter()
        .find(|(path, _)| path.ends_with("pv-nfs-grafana-data.yaml"))
        .unwrap();
    assert_eq!(
        grafana.1,
        "server: 10.0.0.30\npath: /srv/nfs/k3s/grafana\nstorage: 10Gi\n"
    );
}

fn cert_manager_templates(config: &k3s_installer::ClusterConfig) {
    write_template(config, "cert-manager/cert-manager.yaml", "kind: Namespace\n");
    write_template(
        config,
        "cert-manager/clusterIssuer.yaml",
        "name: {{CLUSTER_ISSUER_NAME}}\nemail: {{EMAIL}}\n",
    );
}

#[tokio::test]
async fn test_cert_manager_waits_for_webhook() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, false);
    cert_manager_templates(&config);
    let remote = MockExecutor::new();
    remote.fail_times("rollout status", 1);
    let events = Arc::new(EventLog::default());

    let report = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_cert_manager()
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Succeeded);
    assert_eq!(remote.count("rollout status"), 2);

    let order: Vec<String> = remote.calls().iter().map(|c| c.describe()).collect();
    let rollout = order.iter().rposition(|c| c.contains("rollout status")).unwrap();
    let issuer = order
        .iter()
        .position(|c| c.starts_with("upload") && c.ends_with("clusterIssuer.yaml"))
        .unwrap();
    assert!(rollout < issuer);

    let (_, contents) = remote
        .uploads()
        .into_iter()
        .find(|(path, _)| path.ends_with("clusterIssuer.yaml"))
        .unwrap();
    assert_eq!(contents, "name: letsencrypt-prod\nemail: ops@example.com\n");
}

#[tokio::test]
async fn test_cert_manager_never_ready_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, false);
    cert_manager_templates(&config);
    let remote = MockExecutor::new();
    remote.fail_on("10.0.0.10", "rollout status");
    let events = Arc::new(EventLog::default());

    let err = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_cert_manager()
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::PhaseFailed {
            phase: Phase::CertificateIssuance,
            step_index: 1,
            ..
        }
    ));
    // Rollout policy allows two attempts
    assert_eq!(remote.count("rollout status"), 2);
    assert_eq!(remote.uploads().len(), 1);
}

const COMPONENTS: [&str; 8] = [
    "02-prometheus-operator.yaml",
    "03-prometheus.yaml",
    "05-grafana.yaml",
    "04-servicemonitors.yaml",
    "06-services.yaml",
    "07-cluster-role.yaml",
    "08-cluster-role-binding.yaml",
    "09-grafana-ingress-local.yaml",
];

#[tokio::test]
async fn test_monitoring_applies_crds_then_components() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, false);
    let crds = crd_dir(&config.k3s_version);
    for name in ["b-prometheuses.yaml", "a-alertmanagers.yaml", "notes.txt"] {
        write_template(&config, &crds.join(name).to_string_lossy(), "kind: CustomResourceDefinition\n");
    }
    for name in COMPONENTS {
        write_template(&config, &format!("monitoring/{}", name), "kind: Template\n");
    }
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    let report = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_monitoring()
        .await
        .unwrap();

    assert_eq!(report.status(), RunStatus::Succeeded);
    let names: Vec<String> = remote
        .uploads()
        .into_iter()
        .map(|(path, _)| path.rsplit('/').next().unwrap_or_default().to_string())
        .collect();
    let mut expected = vec!["a-alertmanagers.yaml".to_string(), "b-prometheuses.yaml".to_string()];
    expected.extend(COMPONENTS.iter().map(|s| s.to_string()));
    assert_eq!(names, expected);

    let last = remote.calls().last().unwrap().describe();
    assert!(last.contains("patch deploy -n monitoring prometheus-operator"));
}

#[tokio::test]
async fn test_monitoring_without_crds_directory() {
    let dir = tempfile::tempdir().unwrap();
    let config = cluster_config(dir.path(), 1, 0, false);
    let remote = MockExecutor::new();
    let events = Arc::new(EventLog::default());

    let err = orchestrator(config, remote.clone(), SchedulingStrategy::Sequential, &events)
        .install_monitoring()
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::TemplatesUnreadable { .. }));
    assert!(remote.calls().is_empty());
}
