//! NFS export on the storage server and the in-cluster provisioner

use crate::core::config::NfsConfig;
use crate::core::{RemoteCommand, Step};
use crate::manifest::ManifestTemplate;

const INSTALL_NFS_SERVER: &str = "if ! dpkg -s nfs-kernel-server >/dev/null 2>&1; then \
apt-get update && apt-get install -y nfs-kernel-server; fi";

/// Each argument is a directory to create with open permissions
const CREATE_EXPORT_DIRS: &str = r#"set -e
for dir in "$@"; do
  mkdir -p "$dir"
  chown nobody:nogroup "$dir"
  chmod 0777 "$dir"
done"#;

/// `$1` export root, `$2` client CIDR
const ADD_EXPORT: &str = r#"if grep -qs "^$1 " /etc/exports; then
  echo "export $1 already present"
else
  echo "$1 $2(rw,sync,no_subtree_check,no_root_squash)" >> /etc/exports
fi"#;

/// Steps run on the storage server itself
pub fn export_steps(nfs: &NfsConfig) -> Vec<Step> {
    vec![
        Step::run_interactive(
            "Install nfs-kernel-server",
            RemoteCommand::script(INSTALL_NFS_SERVER).privileged(),
        ),
        Step::run(
            "Create export directories",
            RemoteCommand::script(CREATE_EXPORT_DIRS)
                .args([
                    nfs.nfs_root_path.as_str(),
                    nfs.export_docker_registry.as_str(),
                    nfs.export_grafana.as_str(),
                ])
                .privileged(),
        ),
        Step::run(
            "Add /etc/exports entry",
            RemoteCommand::script(ADD_EXPORT)
                .args([nfs.nfs_root_path.as_str(), nfs.network_cidr.as_str()])
                .privileged(),
        ),
        Step::run(
            "Reload exports",
            RemoteCommand::new("exportfs").arg("-ra").privileged(),
        ),
    ]
}

/// Provisioner manifests applied on the control plane
pub fn provisioner_steps(nfs: &NfsConfig) -> Vec<Step> {
    vec![
        Step::deliver("Apply NFS namespace", ManifestTemplate::from_template("nfs/nfs-namespace.yaml")),
        Step::deliver("Apply NFS RBAC", ManifestTemplate::from_template("nfs/nfs-rbac.yaml")),
        Step::deliver(
            "Apply NFS StorageClass",
            ManifestTemplate::from_template("nfs/nfs-storageclass.yaml"),
        ),
        Step::deliver(
            "Apply NFS provisioner deployment",
            ManifestTemplate::from_template("nfs/nfs-deployment.yaml")
                .with("NFS_SERVER", nfs.nfs_server.as_str())
                .with("NFS_ROOT_PATH", nfs.nfs_root_path.as_str()),
        ),
        Step::deliver(
            "Apply registry data volume",
            ManifestTemplate::from_template("nfs/pv-nfs-docker-registry-data.yaml")
                .with("NFS_SERVER", nfs.nfs_server.as_str())
                .with("NFS_EXPORT", nfs.export_docker_registry.as_str())
                .with("NFS_CAPACITY", nfs.capacity.as_str()),
        ),
        Step::deliver(
            "Apply Grafana data volume",
            ManifestTemplate::from_template("nfs/pv-nfs-grafana-data.yaml")
                .with("NFS_SERVER", nfs.nfs_server.as_str())
                .with("NFS_EXPORT", nfs.export_grafana.as_str())
                .with("NFS_CAPACITY", nfs.capacity.as_str()),
        ),
    ]
}
