//! cert-manager and ClusterIssuer steps

use crate::core::{RemoteCommand, Step};
use crate::execution::RetryPolicy;
use crate::manifest::ManifestTemplate;

pub fn cert_manager_steps(email: &str, issuer_name: &str, rollout: RetryPolicy) -> Vec<Step> {
    vec![
        Step::deliver(
            "Apply cert-manager",
            ManifestTemplate::from_template("cert-manager/cert-manager.yaml"),
        ),
        Step::wait_for(
            "Wait for cert-manager webhook",
            RemoteCommand::new("kubectl")
                .args([
                    "-n",
                    "cert-manager",
                    "rollout",
                    "status",
                    "deploy/cert-manager-webhook",
                    "--timeout=90s",
                ])
                .privileged(),
            rollout,
        ),
        Step::deliver(
            "Apply ClusterIssuer",
            ManifestTemplate::from_template("cert-manager/clusterIssuer.yaml")
                .with("EMAIL", email)
                .with("CLUSTER_ISSUER_NAME", issuer_name),
        ),
    ]
}
