//! Local terminal handling for interactive sessions

use crate::remote::RemoteError;
use nix::sys::termios::{self, SetArg, Termios};
use std::io::{IsTerminal, Read};
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex, MutexGuard};
use tracing::warn;

type Input = mpsc::Receiver<Vec<u8>>;

/// Local stdin, read by one background thread for the life of the process.
///
/// Interactive sessions take turns on the receiver, so a session that ends
/// leaves no read parked on the runtime. The thread is started on first use.
#[derive(Debug, Clone, Default)]
pub struct StdinPump {
    input: Arc<OnceLock<Mutex<Input>>>,
}

impl StdinPump {
    pub async fn lock(&self) -> MutexGuard<'_, Input> {
        self.input
            .get_or_init(|| {
                let (tx, rx) = mpsc::channel(16);
                let spawned = std::thread::Builder::new()
                    .name("stdin-pump".to_string())
                    .spawn(move || pump(std::io::stdin(), tx));
                if let Err(e) = spawned {
                    // The sender is gone, so sessions see stdin as closed
                    warn!(error = %e, "Could not start stdin reader");
                }
                Mutex::new(rx)
            })
            .lock()
            .await
    }
}

/// Forward chunks from `source` until it ends or nobody listens
fn pump(mut source: impl Read, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 1024];
    loop {
        match source.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
        }
    }
}

/// Puts stdin into raw mode and restores the saved settings when dropped.
///
/// When stdin is not a terminal nothing is changed.
pub struct RawModeGuard {
    saved: Option<Termios>,
}

impl RawModeGuard {
    pub fn enable() -> Result<Self, RemoteError> {
        let stdin = std::io::stdin();
        if !stdin.is_terminal() {
            return Ok(Self { saved: None });
        }

        let saved = termios::tcgetattr(&stdin).map_err(|e| RemoteError::Terminal(e.to_string()))?;
        let mut raw = saved.clone();
        termios::cfmakeraw(&mut raw);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &raw).map_err(|e| RemoteError::Terminal(e.to_string()))?;

        Ok(Self { saved: Some(saved) })
    }

    pub fn is_active(&self) -> bool {
        self.saved.is_some()
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Some(saved) = &self.saved {
            let _ = termios::tcsetattr(&std::io::stdin(), SetArg::TCSANOW, saved);
        }
    }
}

/// Local terminal size as (columns, rows), 80x24 when unknown
pub fn terminal_size() -> (u32, u32) {
    match term_size::dimensions_stdout() {
        Some((cols, rows)) => (cols as u32, rows as u32),
        None => (80, 24),
    }
}
