use anyhow::{Context, Result};
use console::Term;
use k3s_installer::cli::commands::{is_confirmation, ValidateCommand};
use k3s_installer::cli::output::*;
use k3s_installer::cli::{Cli, Command};
use k3s_installer::cluster::registry::login_hint;
use k3s_installer::{ClusterConfig, ClusterOrchestrator, Routine, SharedReporter, SshExecutor};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG overrides the level
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set logging subscriber")?;

    let success = match &cli.command {
        Command::Validate(cmd) => validate_config(&cli, cmd)?,
        command => match command.routine() {
            Some(routine) => run_routine(&cli, routine).await?,
            None => true,
        },
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

fn load_config(cli: &Cli) -> Result<ClusterConfig> {
    ClusterConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config {}", cli.config.display()))
}

async fn run_routine(cli: &Cli, routine: Routine) -> Result<bool> {
    let config = load_config(cli)?;
    println!(
        "{} Loaded config: {} master(s), {} worker(s)",
        INFO,
        style(config.masters.len()).cyan(),
        style(config.workers.len()).cyan()
    );

    if let Command::Uninstall(cmd) = &cli.command {
        if !cmd.yes && !confirm_uninstall(&config)? {
            println!("{} Uninstall aborted, no node was touched", INFO);
            return Ok(true);
        }
    }

    let hint = login_hint(&config.docker_registry);
    let remote = Arc::new(SshExecutor::new(&config.ssh));
    let reporter: SharedReporter = Arc::new(ConsoleReporter::new());
    let orchestrator = ClusterOrchestrator::new(config, remote, cli.scheduling_strategy(), reporter);

    println!("{} Starting {}", ROCKET, style(routine).bold());
    match orchestrator.run(routine).await {
        Ok(report) => {
            let success = print_run_report(routine, &report);
            if success && matches!(routine, Routine::Registry | Routine::FullInstall) {
                println!("{} Log in to the registry with: {}", INFO, style(hint).cyan());
            }
            Ok(success)
        }
        Err(e) => {
            error!(routine = %routine, error = %e, "Run aborted");
            print_run_error(routine, &e);
            Ok(false)
        }
    }
}

fn confirm_uninstall(config: &ClusterConfig) -> Result<bool> {
    let term = Term::stdout();
    let nodes = config.masters.len() + config.workers.len();
    term.write_str(&format!(
        "{} This removes k3s and all cluster data from {} node(s). Continue? [y/N] ",
        WARN, nodes
    ))?;
    let answer = term.read_line().context("Failed to read confirmation")?;
    Ok(is_confirmation(&answer))
}

fn validate_config(cli: &Cli, cmd: &ValidateCommand) -> Result<bool> {
    println!("{} Validating {}...", INFO, cli.config.display());

    match load_config(cli) {
        Ok(config) => {
            println!("{} Configuration is valid!", CHECK);
            println!(
                "  k3s version: {}",
                style(if config.k3s_version.is_empty() { "(installer default)" } else { config.k3s_version.as_str() }).bold()
            );
            println!("  Masters: {}", style(config.masters.len()).cyan());
            println!("  Workers: {}", style(config.workers.len()).cyan());
            println!("  NFS server: {}", style(&config.nfs.nfs_server).cyan());
            println!(
                "  Registry: {} ({})",
                style(&config.docker_registry.url).cyan(),
                if config.docker_registry.local { "plaintext" } else { "TLS" }
            );
            println!("  Host key policy: {:?}", config.ssh.host_key_policy);
            println!("  Templates: {}", style(config.templates_dir.display()).dim());

            if cmd.json {
                let json = serde_json::to_string_pretty(&config)?;
                println!("\n{}", json);
            }
            Ok(true)
        }
        Err(e) => {
            println!("{} Validation failed:", CROSS);
            println!("  {}", style(format!("{:#}", e)).red());
            Ok(false)
        }
    }
}
