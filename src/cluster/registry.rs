//! Private container registry steps

use crate::core::config::RegistryConfig;
use crate::core::{Activation, Node, RemoteCommand, Step};
use crate::manifest::ManifestTemplate;

pub const REGISTRY_NAMESPACE: &str = "ic-docker-registry";

const CREATE_NAMESPACE: &str =
    r#"kubectl create namespace "$1" --dry-run=client -o yaml | kubectl apply -f -"#;

/// `$1` htpasswd file, `$2` user; password on stdin
const WRITE_HTPASSWD: &str = r#"set -e
IFS= read -r REGISTRY_PASS
dir=$(dirname "$1")
mkdir -p "$dir" && chmod 700 "$dir"
printf '%s\n' "$REGISTRY_PASS" | htpasswd -i -B -c "$1" "$2""#;

/// `$1` htpasswd file, `$2` namespace
const APPLY_SECRET: &str = r#"set -e
kubectl create secret generic registry-credentials --from-file=htpasswd="$1" \
  -n "$2" --dry-run=client -o yaml | kubectl apply -n "$2" -f -"#;

fn registry_manifest(template: &str, remote: &str) -> ManifestTemplate {
    ManifestTemplate::new(format!("docker-registry/{}", template), remote)
}

/// Credentials, storage and exactly one of the plaintext or TLS variants
pub fn registry_steps(node: &Node, registry: &RegistryConfig) -> Vec<Step> {
    let htpasswd = format!("{}/.registry/htpasswd", node.home_dir());
    let url = registry.url.as_str();

    vec![
        Step::run(
            "Create registry namespace",
            RemoteCommand::script(CREATE_NAMESPACE)
                .arg(REGISTRY_NAMESPACE)
                .privileged(),
        ),
        Step::run(
            "Write registry htpasswd",
            RemoteCommand::script(WRITE_HTPASSWD)
                .args([htpasswd.as_str(), registry.user.as_str()])
                .privileged()
                .stdin_line(registry.pass.expose()),
        ),
        Step::run(
            "Apply registry credentials secret",
            RemoteCommand::script(APPLY_SECRET)
                .args([htpasswd.as_str(), REGISTRY_NAMESPACE])
                .privileged(),
        ),
        Step::deliver(
            "Apply registry volume claim",
            registry_manifest("pvc-localhost.yaml", "docker-registry-pvc-localhost.yaml")
                .with("PVC_Storage_Capacity", registry.pvc_storage_capacity.as_str()),
        ),
        // Plaintext variant
        Step::deliver(
            "Apply registry config (no TLS)",
            registry_manifest("config_without_tls.yaml", "config_without_tls.yaml"),
        )
        .when(Activation::PlaintextRegistry),
        Step::deliver(
            "Apply registry service (no TLS)",
            registry_manifest("service_without_tls.yaml", "docker-registry-service.yaml"),
        )
        .when(Activation::PlaintextRegistry),
        Step::deliver(
            "Apply registry ingress (no TLS)",
            registry_manifest("ingress_without_tls.yaml", "docker-registry-ingress.yaml")
                .with("DOCKER_REGISTRY_URL", url),
        )
        .when(Activation::PlaintextRegistry),
        Step::deliver(
            "Apply registry deployment (no TLS)",
            registry_manifest("deployment_without_tls.yaml", "deployment.yaml"),
        )
        .when(Activation::PlaintextRegistry),
        // TLS variant
        Step::deliver(
            "Apply registry service (TLS)",
            registry_manifest("service.yaml", "docker-registry-service.yaml"),
        )
        .when(Activation::TlsRegistry),
        Step::deliver(
            "Apply registry ingress (TLS)",
            registry_manifest("ingress.yaml", "docker-registry-ingress.yaml").with("DOCKER_REGISTRY_URL", url),
        )
        .when(Activation::TlsRegistry),
        Step::deliver(
            "Apply registry domain certificate",
            registry_manifest("domain-tls-certificate.yaml", "docker-registry-domain-tls-certificate.yaml")
                .with("DOCKER_REGISTRY_URL", url),
        )
        .when(Activation::TlsRegistry),
        Step::deliver(
            "Apply registry deployment (TLS)",
            registry_manifest("deployment.yaml", "deployment.yaml"),
        )
        .when(Activation::TlsRegistry),
    ]
}

/// Where clients log in once the registry is up
pub fn login_hint(registry: &RegistryConfig) -> String {
    if registry.local {
        "docker login http://registry.local:80".to_string()
    } else {
        format!("docker login {}", registry.url)
    }
}
