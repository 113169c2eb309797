//! Worker join steps

use crate::cluster::control_plane::API_PORT;
use crate::core::{JoinToken, RemoteCommand, Step};

/// `$1` version, `$2` server URL; token on stdin
const INSTALL_AGENT: &str = r#"set -e
IFS= read -r K3S_TOKEN; export K3S_TOKEN
curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION="$1" K3S_URL="$2" sh -s - agent"#;

/// Install the k3s agent against `server_address`, then check it is running
pub fn worker_steps(server_address: &str, token: &JoinToken, k3s_version: &str) -> Vec<Step> {
    let server_url = format!("https://{}:{}", server_address, API_PORT);

    vec![
        Step::run_interactive(
            "Install k3s agent",
            RemoteCommand::script(INSTALL_AGENT)
                .args([k3s_version, server_url.as_str()])
                .privileged()
                .stdin_line(token.expose()),
        ),
        Step::run(
            "Verify k3s agent",
            RemoteCommand::new("systemctl").args(["is-active", "--quiet", "k3s-agent"]),
        ),
    ]
}
