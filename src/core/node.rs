//! Node identity model

use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// A secret string that never shows up in `Debug` output or serialized config
#[derive(Clone, PartialEq, Eq, Deserialize, Default)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the underlying value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Role a node plays in the cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
    /// NFS host backing persistent volumes
    StorageServer,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeRole::ControlPlane => "control-plane",
            NodeRole::Worker => "worker",
            NodeRole::StorageServer => "storage",
        };
        f.write_str(name)
    }
}

/// SSH login for a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Secret,
}

/// One remote host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    /// Hostname or IP address
    pub address: String,

    /// SSH port
    pub port: u16,

    pub credentials: Credentials,

    pub role: NodeRole,

    /// Expected SHA256 host key fingerprint when keys are pinned
    pub host_key_fingerprint: Option<String>,
}

impl Node {
    pub fn new(address: impl Into<String>, credentials: Credentials, role: NodeRole) -> Self {
        Self {
            address: address.into(),
            port: 22,
            credentials,
            role,
            host_key_fingerprint: None,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.host_key_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    /// Home directory of the login user on the remote host
    pub fn home_dir(&self) -> String {
        if self.credentials.username == "root" {
            "/root".to_string()
        } else {
            format!("/home/{}", self.credentials.username)
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.credentials.username, self.address)
    }
}
