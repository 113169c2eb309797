//! SSH session executor built on russh

use crate::core::config::SshSettings;
use crate::core::{Node, RemoteCommand};
use crate::remote::host_keys::HostKeyVerifier;
use crate::remote::terminal::{terminal_size, RawModeGuard, StdinPump};
use crate::remote::{CommandOutput, RemoteError, RemoteExecutor};
use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::{ChannelMsg, Disconnect, Pty};
use russh_keys::key::PublicKey;
use russh_sftp::client::SftpSession;
use russh_sftp::protocol::{FileAttributes, OpenFlags};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, error, info};

/// Handler that applies the host key policy during the handshake
struct ClientHandler {
    host: String,
    port: u16,
    pinned: Option<String>,
    verifier: HostKeyVerifier,
    rejection: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(&mut self, server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        match self
            .verifier
            .verify(&self.host, self.port, self.pinned.as_deref(), server_public_key)
        {
            Ok(()) => Ok(true),
            Err(reason) => {
                if let Ok(mut slot) = self.rejection.lock() {
                    *slot = Some(reason);
                }
                Ok(false)
            }
        }
    }
}

/// Executes commands on nodes over password-authenticated SSH.
///
/// Every call opens its own session; nothing is pooled between steps.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    verifier: HostKeyVerifier,
    connect_timeout: Duration,
    stdin: StdinPump,
}

impl SshExecutor {
    pub fn new(settings: &SshSettings) -> Self {
        Self {
            verifier: HostKeyVerifier::new(settings.host_key_policy, settings.known_hosts_path.clone()),
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            stdin: StdinPump::default(),
        }
    }

    async fn connect(&self, node: &Node) -> Result<Handle<ClientHandler>, RemoteError> {
        let host = node.address.clone();
        let rejection = Arc::new(Mutex::new(None));
        let handler = ClientHandler {
            host: host.clone(),
            port: node.port,
            pinned: node.host_key_fingerprint.clone(),
            verifier: self.verifier.clone(),
            rejection: rejection.clone(),
        };
        let config = Arc::new(client::Config::default());

        debug!(host = %host, port = node.port, "Connecting");
        let connecting = client::connect(config, (host.as_str(), node.port), handler);
        let mut handle = match tokio::time::timeout(self.connect_timeout, connecting).await {
            Err(_) => {
                return Err(RemoteError::Timeout {
                    host,
                    secs: self.connect_timeout.as_secs(),
                })
            }
            Ok(Err(e)) => {
                let reason = rejection.lock().ok().and_then(|mut slot| slot.take());
                return Err(match reason {
                    Some(reason) => RemoteError::HostKeyRejected { host, reason },
                    None => RemoteError::Connect {
                        host,
                        reason: e.to_string(),
                    },
                });
            }
            Ok(Ok(handle)) => handle,
        };

        let accepted = handle
            .authenticate_password(node.username(), node.credentials.password.expose())
            .await
            .map_err(|e| RemoteError::Connect {
                host: host.clone(),
                reason: e.to_string(),
            })?;
        if !accepted {
            return Err(RemoteError::AuthRejected {
                host,
                user: node.username().to_string(),
            });
        }

        Ok(handle)
    }

    async fn disconnect(handle: Handle<ClientHandler>) {
        let _ = handle.disconnect(Disconnect::ByApplication, "", "en").await;
    }

    async fn sftp(&self, node: &Node, handle: &Handle<ClientHandler>) -> Result<SftpSession, RemoteError> {
        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| RemoteError::channel(&node.address, e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| RemoteError::channel(&node.address, e))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| RemoteError::channel(&node.address, e))
    }
}

fn exit_error(node: &Node, command: &RemoteCommand, status: u32, stderr: String) -> RemoteError {
    RemoteError::NonZeroExit {
        host: node.address.clone(),
        command: command.program().to_string(),
        status,
        stderr: stderr.trim().to_string(),
    }
}

/// Success only on an explicit zero exit status
fn channel_outcome(
    node: &Node,
    command: &RemoteCommand,
    exit_status: Option<u32>,
    signal: Option<String>,
    stderr: String,
) -> Result<(), RemoteError> {
    match (exit_status, signal) {
        (Some(0), _) => Ok(()),
        (Some(status), _) => Err(exit_error(node, command, status, stderr)),
        (None, Some(signal)) => Err(RemoteError::Signalled {
            host: node.address.clone(),
            command: command.program().to_string(),
            signal,
        }),
        (None, None) => Err(RemoteError::channel(&node.address, "channel closed without exit status")),
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn run(&self, node: &Node, command: &RemoteCommand) -> Result<CommandOutput, RemoteError> {
        info!(host = %node.address, command = %command, "Running");
        let handle = self.connect(node).await?;

        let result = async {
            let mut channel = handle
                .channel_open_session()
                .await
                .map_err(|e| RemoteError::channel(&node.address, e))?;
            channel
                .exec(true, command.to_shell_string())
                .await
                .map_err(|e| RemoteError::channel(&node.address, e))?;

            if let Some(payload) = command.stdin_payload(node.credentials.password.expose()) {
                channel
                    .data(payload.as_bytes())
                    .await
                    .map_err(|e| RemoteError::channel(&node.address, e))?;
            }
            channel
                .eof()
                .await
                .map_err(|e| RemoteError::channel(&node.address, e))?;

            let mut stdout = Vec::new();
            let mut stderr = Vec::new();
            let mut exit_status = None;
            let mut exit_signal = None;
            while let Some(msg) = channel.wait().await {
                match msg {
                    ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                    ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                    ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
                    ChannelMsg::ExitSignal { signal_name, .. } => exit_signal = Some(format!("{:?}", signal_name)),
                    _ => {}
                }
            }

            let output = CommandOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_status: exit_status.unwrap_or(0),
            };
            channel_outcome(node, command, exit_status, exit_signal, output.stderr.clone()).map(|()| output)
        }
        .await;

        Self::disconnect(handle).await;

        match &result {
            Ok(output) => {
                debug!(host = %node.address, stdout = %output.stdout.trim_end(), "Command succeeded");
            }
            Err(e) => error!(host = %node.address, error = %e, "Command failed"),
        }
        result
    }

    async fn run_interactive(&self, node: &Node, command: &RemoteCommand) -> Result<(), RemoteError> {
        info!(host = %node.address, command = %command, "Running interactively");
        let handle = self.connect(node).await?;

        let result = async {
            let mut channel = handle
                .channel_open_session()
                .await
                .map_err(|e| RemoteError::channel(&node.address, e))?;

            let (cols, rows) = terminal_size();
            let term = std::env::var("TERM").unwrap_or_else(|_| "xterm".to_string());
            // Echo stays off so the sudo password written below is not shown
            channel
                .request_pty(false, &term, cols, rows, 0, 0, &[(Pty::ECHO, 0)])
                .await
                .map_err(|e| RemoteError::channel(&node.address, e))?;
            channel
                .exec(true, command.to_shell_string())
                .await
                .map_err(|e| RemoteError::channel(&node.address, e))?;

            if let Some(payload) = command.stdin_payload(node.credentials.password.expose()) {
                channel
                    .data(payload.as_bytes())
                    .await
                    .map_err(|e| RemoteError::channel(&node.address, e))?;
            }

            let mut input = self.stdin.lock().await;
            // Keystrokes typed between sessions are dropped
            while input.try_recv().is_ok() {}

            let _raw = RawModeGuard::enable()?;
            let mut sigterm =
                signal(SignalKind::terminate()).map_err(|e| RemoteError::Terminal(e.to_string()))?;
            let mut stdout = tokio::io::stdout();
            let mut stderr = tokio::io::stderr();
            let mut stdin_open = true;
            let mut exit_status = None;
            let mut exit_signal = None;

            loop {
                tokio::select! {
                    chunk = input.recv(), if stdin_open => match chunk {
                        None => {
                            stdin_open = false;
                            let _ = channel.eof().await;
                        }
                        Some(bytes) => {
                            channel
                                .data(&bytes[..])
                                .await
                                .map_err(|e| RemoteError::channel(&node.address, e))?;
                        }
                    },
                    msg = channel.wait() => match msg {
                        Some(ChannelMsg::Data { ref data }) => {
                            let _ = stdout.write_all(data).await;
                            let _ = stdout.flush().await;
                        }
                        Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                            let _ = stderr.write_all(data).await;
                            let _ = stderr.flush().await;
                        }
                        Some(ChannelMsg::ExitStatus { exit_status: status }) => exit_status = Some(status),
                        Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                            exit_signal = Some(format!("{:?}", signal_name));
                        }
                        Some(_) => {}
                        None => break,
                    },
                    _ = tokio::signal::ctrl_c() => return Err(RemoteError::Interrupted),
                    _ = sigterm.recv() => return Err(RemoteError::Interrupted),
                }
            }

            channel_outcome(node, command, exit_status, exit_signal, String::new())
        }
        .await;

        Self::disconnect(handle).await;

        if let Err(e) = &result {
            error!(host = %node.address, error = %e, "Interactive command failed");
        }
        result
    }

    async fn upload(&self, node: &Node, remote_path: &str, contents: &[u8]) -> Result<(), RemoteError> {
        info!(host = %node.address, path = remote_path, bytes = contents.len(), "Uploading");
        let handle = self.connect(node).await?;

        let result = async {
            let sftp = self.sftp(node, &handle).await?;
            let attrs = FileAttributes {
                permissions: Some(0o600),
                ..Default::default()
            };
            let mut file = sftp
                .open_with_flags_and_attributes(
                    remote_path,
                    OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
                    attrs,
                )
                .await
                .map_err(|e| RemoteError::transfer(&node.address, remote_path, e))?;
            file.write_all(contents)
                .await
                .map_err(|e| RemoteError::transfer(&node.address, remote_path, e))?;
            file.shutdown()
                .await
                .map_err(|e| RemoteError::transfer(&node.address, remote_path, e))?;
            let _ = sftp.close().await;
            Ok(())
        }
        .await;

        Self::disconnect(handle).await;
        result
    }

    async fn download(&self, node: &Node, remote_path: &str) -> Result<Vec<u8>, RemoteError> {
        info!(host = %node.address, path = remote_path, "Downloading");
        let handle = self.connect(node).await?;

        let result = async {
            let sftp = self.sftp(node, &handle).await?;
            let mut file = sftp
                .open(remote_path)
                .await
                .map_err(|e| RemoteError::transfer(&node.address, remote_path, e))?;
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)
                .await
                .map_err(|e| RemoteError::transfer(&node.address, remote_path, e))?;
            let _ = sftp.close().await;
            Ok(contents)
        }
        .await;

        Self::disconnect(handle).await;
        result
    }
}
