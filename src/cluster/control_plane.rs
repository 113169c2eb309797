//! Control-plane install steps

use crate::core::{JoinToken, Node, RemoteCommand, Step};

pub const TOKEN_PATH: &str = "/var/lib/rancher/k3s/server/node-token";
pub const KUBECONFIG_PATH: &str = "/etc/rancher/k3s/k3s.yaml";
pub const API_PORT: u16 = 6443;

const INSTALL_TOOLS: &str = "if ! command -v htpasswd >/dev/null 2>&1; then \
apt-get update && apt-get install -y apache2-utils; fi";

/// `$1` version, `$2` TLS SAN, remaining args passed to the server
const INSTALL_SERVER: &str = r#"set -e
version="$1"; san="$2"; shift 2
curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION="$version" sh -s - server \
  --write-kubeconfig-mode=644 --secrets-encryption --tls-san="$san" "$@""#;

/// Same as the plain install, with the join token read from stdin
const JOIN_SERVER: &str = r#"set -e
IFS= read -r K3S_TOKEN; export K3S_TOKEN
version="$1"; san="$2"; shift 2
curl -sfL https://get.k3s.io | INSTALL_K3S_VERSION="$version" sh -s - server \
  --write-kubeconfig-mode=644 --secrets-encryption --tls-san="$san" "$@""#;

/// `$1` user, `$2` home, `$3` address the API is reached at
const RELOCATE_KUBECONFIG: &str = r#"set -e
mkdir -p "$2/.kube"
cp /etc/rancher/k3s/k3s.yaml "$2/.kube/config"
chown "$1:$1" "$2/.kube" "$2/.kube/config"
chmod 600 "$2/.kube/config"
sed -i "s/127\.0\.0\.1/$3/" "$2/.kube/config""#;

/// How an additional control-plane node reaches the first one
#[derive(Debug, Clone)]
pub struct JoinTarget {
    pub server_address: String,
    pub token: JoinToken,
}

impl JoinTarget {
    pub fn server_url(&self) -> String {
        format!("https://{}:{}", self.server_address, API_PORT)
    }
}

/// Steps for one control-plane node.
///
/// Without a join target the node starts a new cluster; `cluster_init`
/// enables embedded etcd so further servers can join it.
pub fn control_plane_steps(
    node: &Node,
    k3s_version: &str,
    domain: &str,
    cluster_init: bool,
    join: Option<&JoinTarget>,
) -> Vec<Step> {
    let install = match join {
        None => {
            let cmd = RemoteCommand::script(INSTALL_SERVER)
                .args([k3s_version, domain])
                .privileged();
            if cluster_init {
                cmd.arg("--cluster-init")
            } else {
                cmd
            }
        }
        Some(target) => RemoteCommand::script(JOIN_SERVER)
            .args([k3s_version, domain, "--server"])
            .arg(target.server_url())
            .privileged()
            .stdin_line(target.token.expose()),
    };

    vec![
        Step::run(
            "Install apache2-utils",
            RemoteCommand::script(INSTALL_TOOLS).privileged(),
        ),
        Step::run_interactive("Install k3s server", install),
        Step::run(
            "Verify k3s server",
            RemoteCommand::new("systemctl").args(["is-active", "--quiet", "k3s"]),
        ),
        Step::run(
            "Relocate kubeconfig",
            RemoteCommand::script(RELOCATE_KUBECONFIG)
                .arg(node.username())
                .arg(node.home_dir())
                .arg(node.address.as_str())
                .privileged(),
        ),
    ]
}

/// Command that prints the join token
pub fn read_token_command() -> RemoteCommand {
    RemoteCommand::new("cat").arg(TOKEN_PATH).privileged()
}

/// Point a downloaded kubeconfig at the server's address instead of loopback
pub fn rewrite_kubeconfig(contents: &str, address: &str) -> String {
    contents.replace("127.0.0.1", address)
}
