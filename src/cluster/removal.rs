//! Cluster removal steps. Every step succeeds when its target is already gone.

use crate::core::{RemoteCommand, Step};

pub const DATA_DIRS: [&str; 6] = [
    "/etc/rancher",
    "/var/lib/rancher",
    "/var/lib/kubelet",
    "/etc/cni",
    "/opt/cni",
    "/var/lib/containerd",
];

const STOP_SERVICES: &str = "systemctl stop k3s 2>/dev/null || true; \
systemctl stop k3s-agent 2>/dev/null || true";

const RUN_UNINSTALLERS: &str = r#"set -e
for script in /usr/local/bin/k3s-uninstall.sh /usr/local/bin/k3s-agent-uninstall.sh; do
  if [ -x "$script" ]; then "$script"; fi
done"#;

/// `$1` directory; refuses empty and root paths
const REMOVE_EXPORT_DIR: &str = r#"case "$1" in ""|/) echo "refusing to remove '$1'" >&2; exit 1;; esac
if [ -d "$1" ]; then rm -rf -- "$1"; fi"#;

pub fn removal_steps(nfs_export_dir: &str) -> Vec<Step> {
    vec![
        Step::run(
            "Stop k3s services",
            RemoteCommand::script(STOP_SERVICES).privileged(),
        ),
        Step::run(
            "Run k3s uninstall scripts",
            RemoteCommand::script(RUN_UNINSTALLERS).privileged(),
        ),
        Step::run(
            "Remove cluster data",
            RemoteCommand::new("rm").arg("-rf").arg("--").args(DATA_DIRS).privileged(),
        ),
        Step::run(
            "Remove NFS export directory",
            RemoteCommand::script(REMOVE_EXPORT_DIR).arg(nfs_export_dir).privileged(),
        ),
    ]
}
