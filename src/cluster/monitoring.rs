//! Prometheus and Grafana steps

use crate::core::{RemoteCommand, Step};
use crate::manifest::ManifestTemplate;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const MONITORING_NAMESPACE: &str = "monitoring";

const CREATE_NAMESPACE: &str =
    r#"kubectl create namespace "$1" --dry-run=client -o yaml | kubectl apply -f -"#;

const OPERATOR_PATCH: &str =
    r#"{"spec": {"template": {"spec": {"serviceAccountName": "prometheus-operator"}}}}"#;

const COMPONENTS: [(&str, &str); 8] = [
    ("Apply Prometheus operator", "02-prometheus-operator.yaml"),
    ("Apply Prometheus", "03-prometheus.yaml"),
    ("Apply Grafana", "05-grafana.yaml"),
    ("Apply ServiceMonitors", "04-servicemonitors.yaml"),
    ("Apply monitoring services", "06-services.yaml"),
    ("Apply monitoring cluster role", "07-cluster-role.yaml"),
    ("Apply monitoring cluster role binding", "08-cluster-role-binding.yaml"),
    ("Apply Grafana ingress", "09-grafana-ingress-local.yaml"),
];

/// CRD directory for a k3s version, relative to the templates directory
pub fn crd_dir(k3s_version: &str) -> PathBuf {
    Path::new("monitoring")
        .join(k3s_version)
        .join("monitoring-crds-offline")
}

/// `*.yaml` files in the CRD directory, sorted by name
pub fn list_crds(templates_dir: &Path, k3s_version: &str) -> io::Result<Vec<PathBuf>> {
    let relative = crd_dir(k3s_version);
    let mut files: Vec<PathBuf> = std::fs::read_dir(templates_dir.join(&relative))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name())
        .filter(|name| Path::new(name).extension().is_some_and(|ext| ext == "yaml"))
        .map(|name| relative.join(name))
        .collect();
    files.sort();
    Ok(files)
}

pub fn monitoring_steps(crds: &[PathBuf], crd_settle: Duration, operator_settle: Duration) -> Vec<Step> {
    let mut steps = vec![Step::run(
        "Create monitoring namespace",
        RemoteCommand::script(CREATE_NAMESPACE)
            .arg(MONITORING_NAMESPACE)
            .privileged(),
    )];

    for crd in crds {
        let name = crd
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        steps.push(Step::deliver(
            format!("Apply CRD {}", name),
            ManifestTemplate::from_template(crd.clone()),
        ));
    }

    steps.push(Step::pause("Wait for CRD registration", crd_settle));

    for (name, file) in COMPONENTS {
        steps.push(Step::deliver(
            name,
            ManifestTemplate::from_template(Path::new("monitoring").join(file)),
        ));
    }

    steps.push(Step::pause("Wait for monitoring components", operator_settle));
    steps.push(Step::run(
        "Patch Prometheus operator service account",
        RemoteCommand::new("kubectl")
            .args([
                "patch",
                "deploy",
                "-n",
                MONITORING_NAMESPACE,
                "prometheus-operator",
                "--patch",
                OPERATOR_PATCH,
            ])
            .privileged(),
    ));
    steps
}
