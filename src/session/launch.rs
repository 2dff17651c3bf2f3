//! Wallet process launcher
//!
//! Spawns `zingo-cli` (usually through `docker exec`) attached to a
//! pseudo-terminal so prompts are flushed line by line. The session owns the
//! child and the pty; dropping it kills and reaps whatever is still running.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::WalletConfig;
use crate::error::{Error, Result};

use super::{SessionLauncher, Transport};

/// Line terminator written after every command (Enter on a tty)
pub const LINE_TERMINATOR: &str = "\r";

/// Capacity of the reader thread → session channel
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// How the wallet binary is invoked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Interactive prompt on a tty, sync enabled
    Interactive,
    /// One-shot read-only query, sync suppressed
    Query,
    /// One-shot command with sync enabled
    Sync,
}

/// Program, arguments and environment of a wallet process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl LaunchSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Build the zingo-cli invocation for a wallet
    ///
    /// With a container configured this is
    /// `docker exec -i [-t] <container> zingo-cli --data-dir .. --server .. --chain .. [--nosync]`,
    /// otherwise the binary is run directly on the host.
    pub fn zingo(wallet: &WalletConfig, mode: SessionMode) -> Self {
        let mut spec = if wallet.container.is_empty() {
            LaunchSpec::new(&wallet.binary)
        } else {
            let mut spec = LaunchSpec::new("docker").arg("exec").arg("-i");
            if mode == SessionMode::Interactive {
                spec = spec.arg("-t");
            }
            spec.arg(&wallet.container).arg(&wallet.binary)
        };

        spec = spec
            .arg("--data-dir")
            .arg(&wallet.data_dir)
            .arg("--server")
            .arg(&wallet.server_uri)
            .arg("--chain")
            .arg(&wallet.chain);

        if mode == SessionMode::Query {
            spec = spec.arg("--nosync");
        }

        if mode == SessionMode::Interactive {
            spec = spec.env("TERM", &wallet.term);
        }

        spec
    }

    /// Command line for log output
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A wallet process attached to a pseudo-terminal
pub struct PtySession {
    child: Box<dyn Child + Send>,
    // Keeps the pty open for the lifetime of the session
    _master: Box<dyn MasterPty + Send>,
    writer: Box<dyn Write + Send>,
    output: mpsc::Receiver<Vec<u8>>,
    quit_grace: Duration,
    closed: bool,
}

impl PtySession {
    /// Spawn the process described by `spec` on a fresh pty
    pub fn start(spec: &LaunchSpec, quit_grace: Duration) -> Result<Self> {
        let pty_system = native_pty_system();

        let pair = pty_system
            .openpty(PtySize {
                rows: 50,
                cols: 200,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| Error::Launch(format!("failed to open pty: {}", e)))?;

        let mut cmd = CommandBuilder::new(&spec.program);
        cmd.args(&spec.args);
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| Error::Launch(format!("{}: {}", spec.display(), e)))?;

        // The child holds its own handle; ours must go so EOF reaches the reader
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| Error::Launch(format!("failed to clone pty reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| Error::Launch(format!("failed to take pty writer: {}", e)))?;

        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        std::thread::Builder::new()
            .name("wallet-pty-reader".to_string())
            .spawn(move || pump_output(reader, tx))
            .map_err(|e| Error::Launch(format!("failed to spawn pty reader: {}", e)))?;

        info!(
            "Started wallet session (pid {:?}): {}",
            child.process_id(),
            spec.display()
        );

        Ok(Self {
            child,
            _master: pair.master,
            writer,
            output: rx,
            quit_grace,
            closed: false,
        })
    }

    fn kill_and_reap(&mut self) {
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        if let Err(e) = self.child.kill() {
            debug!("Kill failed (process likely gone): {}", e);
        }
        if let Err(e) = self.child.wait() {
            warn!("Failed to reap wallet process: {}", e);
        }
    }
}

/// Blocking reader loop, runs on its own thread until EOF
fn pump_output(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                debug!("PTY reader: EOF");
                break;
            }
            Ok(n) => {
                if tx.blocking_send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                // EIO is how Linux reports a closed pty
                debug!("PTY reader stopped: {}", e);
                break;
            }
        }
    }
}

#[async_trait]
impl Transport for PtySession {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.writer.write_all(line.as_bytes())?;
        self.writer.write_all(LINE_TERMINATOR.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    async fn read_chunk(&mut self) -> Option<Vec<u8>> {
        self.output.recv().await
    }

    fn discard_pending(&mut self) {
        while self.output.try_recv().is_ok() {}
    }

    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let start = Instant::now();
        while start.elapsed() < self.quit_grace {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    debug!("Wallet process exited: {:?}", status);
                    return;
                }
                Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
                Err(e) => {
                    warn!("Failed to poll wallet process: {}", e);
                    break;
                }
            }
        }

        warn!(
            "Wallet process did not exit within {:?}, killing it",
            self.quit_grace
        );
        self.kill_and_reap();
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if !self.closed {
            self.kill_and_reap();
        }
    }
}

/// Launches interactive wallet sessions on a pty
#[derive(Debug, Clone)]
pub struct PtyLauncher {
    spec: LaunchSpec,
    quit_grace: Duration,
}

impl PtyLauncher {
    pub fn new(spec: LaunchSpec, quit_grace: Duration) -> Self {
        Self { spec, quit_grace }
    }

    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }
}

#[async_trait]
impl SessionLauncher for PtyLauncher {
    type Session = PtySession;

    async fn launch(&self) -> Result<PtySession> {
        PtySession::start(&self.spec, self.quit_grace)
    }
}
