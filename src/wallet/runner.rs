//! One-shot wallet commands
//!
//! Read-only queries do not need the interactive state machine: the wallet
//! is started, fed `<command>\nquit\n` on stdin and its complete output is
//! parsed once it exits.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::session::LaunchSpec;

use super::parser::{
    first_transparent_address, first_unified_address, parse_balance, reports_sync_error,
    unified_prefix,
};
use super::types::BalanceSnapshot;

/// Runs single wallet commands to completion
#[derive(Debug, Clone)]
pub struct CommandRunner {
    spec: LaunchSpec,
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(spec: LaunchSpec, timeout: Duration) -> Self {
        Self { spec, timeout }
    }

    /// Run `command` and return stdout followed by stderr
    pub async fn run(&self, command: &str) -> Result<String> {
        debug!("Running wallet command {:?} via {}", command, self.spec.display());

        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .envs(self.spec.env.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Launch(format!("{}: {}", self.spec.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = format!("{}\nquit\n", command);
            match stdin.write_all(input.as_bytes()).await {
                Ok(()) => {}
                // The process may exit without reading its input
                Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
                    debug!("Wallet closed stdin early");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| Error::Timeout {
                context: format!("running wallet command {:?}", command),
                secs: self.timeout.as_secs(),
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(Error::Command(format!(
                "{:?} exited with {}: {}",
                command,
                output.status,
                stderr.trim()
            )));
        }

        Ok(format!("{}{}", stdout, stderr))
    }

    /// Current per-pool balances
    pub async fn balance(&self) -> Result<BalanceSnapshot> {
        let output = self.run("balance").await?;
        Ok(parse_balance(&output))
    }

    /// The wallet's unified address for `chain`, if it printed one
    pub async fn unified_address(&self, chain: &str) -> Result<Option<String>> {
        let output = self.run("addresses").await?;
        Ok(first_unified_address(&output, unified_prefix(chain)))
    }

    pub async fn transparent_address(&self) -> Result<Option<String>> {
        let output = self.run("t_addresses").await?;
        Ok(first_transparent_address(&output))
    }

    /// Sync the wallet with the chain
    pub async fn sync(&self) -> Result<()> {
        let output = self.run("sync run").await?;
        if reports_sync_error(&output) {
            return Err(Error::Command(format!(
                "wallet reported a sync error: {}",
                output.trim()
            )));
        }
        info!("Wallet synced");
        Ok(())
    }
}
