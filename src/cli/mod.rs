//! Command-line interface

pub mod commands;
pub mod output;

use crate::cluster::Routine;
use crate::execution::SchedulingStrategy;
use clap::{Parser, Subcommand};
use commands::{SchedulingStrategyArg, UninstallCommand, ValidateCommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// Provision and tear down k3s clusters over SSH
#[derive(Debug, Parser, Clone)]
#[command(name = "k3s-installer")]
#[command(version)]
#[command(about = "Provision and tear down k3s clusters over SSH", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the cluster configuration file (JSON, or YAML by extension)
    #[arg(short, long, global = true, default_value = "config.json")]
    pub config: PathBuf,

    /// How worker pipelines are scheduled across nodes
    #[arg(long, global = true, value_enum, default_value_t = SchedulingStrategyArg::Sequential)]
    pub strategy: SchedulingStrategyArg,

    /// Concurrency limit for `--strategy parallel-limited`
    #[arg(long, global = true, default_value_t = 4)]
    pub max_parallel: usize,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Full install: control plane, workers, NFS, cert-manager, provisioner, registry, monitoring
    Install,

    /// Install the control plane and fetch the join token and kubeconfig
    Master,

    /// Join worker nodes using the stored join token
    Worker,

    /// Export the NFS directories on the storage server
    NfsMount,

    /// Install cert-manager and the ClusterIssuer
    CertManager,

    /// Install the NFS client provisioner
    NfsProvisioner,

    /// Install the private container registry
    Registry,

    /// Install Prometheus and Grafana
    Monitoring,

    /// Remove k3s and all cluster data from every node
    Uninstall(UninstallCommand),

    /// Validate the configuration file without touching any node
    Validate(ValidateCommand),
}

impl Command {
    /// The routine this command runs, if it touches the cluster
    pub fn routine(&self) -> Option<Routine> {
        match self {
            Command::Install => Some(Routine::FullInstall),
            Command::Master => Some(Routine::ControlPlane),
            Command::Worker => Some(Routine::Workers),
            Command::NfsMount => Some(Routine::SharedStorage),
            Command::CertManager => Some(Routine::CertManager),
            Command::NfsProvisioner => Some(Routine::StorageProvisioner),
            Command::Registry => Some(Routine::Registry),
            Command::Monitoring => Some(Routine::Monitoring),
            Command::Uninstall(_) => Some(Routine::Uninstall),
            Command::Validate(_) => None,
        }
    }
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }

    pub fn scheduling_strategy(&self) -> SchedulingStrategy {
        self.strategy.to_strategy(self.max_parallel)
    }
}
