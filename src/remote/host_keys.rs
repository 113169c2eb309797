//! Host key verification

use russh_keys::key::PublicKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// How server host keys are checked
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Key must already be in known_hosts
    #[default]
    Strict,
    /// Unknown hosts are trusted and recorded; changed keys are rejected
    AcceptNew,
    /// Key must match the node's configured fingerprint
    Pinned,
    /// Any key is accepted
    Insecure,
}

/// What known_hosts says about a presented key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KnownHostStatus {
    Match,
    Unknown,
    /// A different key is recorded on this line
    Changed(usize),
}

/// Verdict for a presented key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept,
    /// Accept and record into known_hosts
    Learn,
    Reject(String),
}

/// Decide on a key given the policy, the known_hosts lookup and the pinned fingerprint
pub fn decide(
    policy: HostKeyPolicy,
    known: &KnownHostStatus,
    pinned: Option<&str>,
    presented_fingerprint: &str,
) -> Decision {
    match policy {
        HostKeyPolicy::Insecure => Decision::Accept,
        HostKeyPolicy::Pinned => match pinned {
            None => Decision::Reject("no fingerprint pinned for this node".to_string()),
            Some(expected) if normalize(expected) == normalize(presented_fingerprint) => Decision::Accept,
            Some(expected) => Decision::Reject(format!(
                "fingerprint SHA256:{} does not match pinned {}",
                normalize(presented_fingerprint),
                expected
            )),
        },
        HostKeyPolicy::Strict | HostKeyPolicy::AcceptNew => match known {
            KnownHostStatus::Match => Decision::Accept,
            KnownHostStatus::Changed(line) => Decision::Reject(format!(
                "key differs from the one recorded in known_hosts line {}",
                line
            )),
            KnownHostStatus::Unknown if policy == HostKeyPolicy::AcceptNew => Decision::Learn,
            KnownHostStatus::Unknown => Decision::Reject(format!(
                "unknown host (SHA256:{}); add it to known_hosts or set ssh.host_key_policy",
                normalize(presented_fingerprint)
            )),
        },
    }
}

fn normalize(fingerprint: &str) -> &str {
    let fingerprint = fingerprint.trim();
    fingerprint.strip_prefix("SHA256:").unwrap_or(fingerprint)
}

/// Checks server keys for one connection
#[derive(Debug, Clone)]
pub struct HostKeyVerifier {
    pub policy: HostKeyPolicy,
    pub known_hosts: PathBuf,
}

impl HostKeyVerifier {
    pub fn new(policy: HostKeyPolicy, known_hosts: Option<PathBuf>) -> Self {
        let known_hosts = known_hosts.unwrap_or_else(default_known_hosts);
        Self { policy, known_hosts }
    }

    /// Verify `key` presented by `host:port`. `Err` carries the rejection reason.
    pub fn verify(&self, host: &str, port: u16, pinned: Option<&str>, key: &PublicKey) -> Result<(), String> {
        let fingerprint = key.fingerprint();
        let known = if matches!(self.policy, HostKeyPolicy::Strict | HostKeyPolicy::AcceptNew) {
            lookup(host, port, key, &self.known_hosts)?
        } else {
            KnownHostStatus::Unknown
        };

        match decide(self.policy, &known, pinned, &fingerprint) {
            Decision::Accept => {
                if self.policy == HostKeyPolicy::Insecure {
                    warn!(host, fingerprint = %fingerprint, "Host key accepted without verification");
                }
                Ok(())
            }
            Decision::Learn => {
                info!(host, fingerprint = %fingerprint, "Recording new host key");
                if let Some(parent) = self.known_hosts.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
                }
                russh_keys::learn_known_hosts_path(host, port, key, &self.known_hosts)
                    .map_err(|e| format!("could not record host key: {}", e))
            }
            Decision::Reject(reason) => Err(reason),
        }
    }
}

fn lookup(host: &str, port: u16, key: &PublicKey, path: &Path) -> Result<KnownHostStatus, String> {
    if !path.exists() {
        return Ok(KnownHostStatus::Unknown);
    }
    match russh_keys::check_known_hosts_path(host, port, key, path) {
        Ok(true) => Ok(KnownHostStatus::Match),
        Ok(false) => Ok(KnownHostStatus::Unknown),
        Err(russh_keys::Error::KeyChanged { line }) => Ok(KnownHostStatus::Changed(line)),
        Err(e) => Err(format!("could not read {}: {}", path.display(), e)),
    }
}

fn default_known_hosts() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".ssh")
        .join("known_hosts")
}
