//! Faucet wallet - core wallet operations
//!
//! Owns the session launcher, the one-shot runners and the history ledger,
//! and serializes transfers so only one interactive session is ever open.

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::{LaunchSpec, PtyLauncher, SessionLauncher, SessionMode};

use super::history::HistoryLedger;
use super::protocol::TransferSettings;
use super::runner::CommandRunner;
use super::sequencer::TransferSequencer;
use super::types::{
    BalanceSnapshot, FailureReason, FaucetStats, HistoryEntry, TransferRequest, TransferResult,
};

/// The faucet's wallet
///
/// Construct once and share by reference (or `Arc`); the transfer lock
/// lives inside.
pub struct FaucetWallet<L = PtyLauncher> {
    /// Starts interactive sessions for transfers
    launcher: L,

    /// Read-only queries, sync suppressed
    query_runner: CommandRunner,

    /// Manual sync
    sync_runner: CommandRunner,

    ledger: HistoryLedger,

    settings: TransferSettings,

    /// Network name, selects the unified address prefix
    chain: String,

    /// Held for the lifetime of every interactive session
    session_lock: Mutex<()>,
}

impl FaucetWallet<PtyLauncher> {
    /// Build the production wallet from configuration
    pub fn from_config(config: &Config) -> Self {
        let wallet = &config.wallet;
        let launcher = PtyLauncher::new(
            LaunchSpec::zingo(wallet, SessionMode::Interactive),
            config.timeouts.quit_grace(),
        );

        Self::new(
            launcher,
            CommandRunner::new(
                LaunchSpec::zingo(wallet, SessionMode::Query),
                config.timeouts.query(),
            ),
            CommandRunner::new(
                LaunchSpec::zingo(wallet, SessionMode::Sync),
                config.timeouts.sync(),
            ),
            HistoryLedger::new(&config.history.path),
            TransferSettings::from_config(config),
            &wallet.chain,
        )
    }
}

impl<L: SessionLauncher> FaucetWallet<L> {
    pub fn new(
        launcher: L,
        query_runner: CommandRunner,
        sync_runner: CommandRunner,
        ledger: HistoryLedger,
        settings: TransferSettings,
        chain: &str,
    ) -> Self {
        Self {
            launcher,
            query_runner,
            sync_runner,
            ledger,
            settings,
            chain: chain.to_string(),
            session_lock: Mutex::new(()),
        }
    }

    /// Send funds, waiting for any transfer already in flight
    ///
    /// Never returns an error: every failure is reported in the result.
    pub async fn transfer(&self, request: TransferRequest) -> TransferResult {
        let _guard = self.session_lock.lock().await;

        let span = info_span!("transfer", id = %Uuid::new_v4());
        self.transfer_locked(request).instrument(span).await
    }

    async fn transfer_locked(&self, request: TransferRequest) -> TransferResult {
        info!(
            "Sending {} ZEC to {}",
            request.amount, request.to_address
        );

        let session = match self.launcher.launch().await {
            Ok(session) => session,
            Err(e) => {
                error!("Could not start wallet session: {}", e);
                return TransferResult::Failure {
                    reason: FailureReason::Launch,
                    error: e.to_string(),
                };
            }
        };

        let sequencer = TransferSequencer::new(session, self.settings.clone());
        match sequencer.execute(&request).await {
            Ok(txid) => {
                let timestamp = Utc::now();
                // The funds are gone either way; a lost ledger entry is only logged
                if let Err(e) = self
                    .ledger
                    .append(HistoryEntry::new(&request, &txid, timestamp))
                    .await
                {
                    error!("Transfer {} succeeded but was not recorded: {}", txid, e);
                }
                info!("Transfer complete: {} ZEC (txid {})", request.amount, txid);
                TransferResult::Success { txid, timestamp }
            }
            Err(failure) => TransferResult::Failure {
                reason: failure.reason,
                error: failure.to_string(),
            },
        }
    }

    /// Current balances, without syncing
    pub async fn balance(&self) -> Result<BalanceSnapshot> {
        self.query_runner.balance().await
    }

    /// The faucet's unified address
    pub async fn address(&self) -> Result<String> {
        self.query_runner
            .unified_address(&self.chain)
            .await?
            .ok_or_else(|| Error::Command("wallet printed no unified address".to_string()))
    }

    pub async fn transparent_address(&self) -> Result<String> {
        self.query_runner
            .transparent_address()
            .await?
            .ok_or_else(|| Error::Command("wallet printed no transparent address".to_string()))
    }

    /// Sync with the chain
    ///
    /// Takes the transfer lock, syncing mutates wallet state.
    pub async fn sync(&self) -> Result<()> {
        let _guard = self.session_lock.lock().await;
        self.sync_runner.sync().await
    }

    /// The most recent `limit` transfers, oldest first
    pub async fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.ledger.query(limit).await
    }

    pub async fn stats(&self) -> Result<FaucetStats> {
        let address = match self.address().await {
            Ok(address) => Some(address),
            Err(e) => {
                warn!("Could not read faucet address: {}", e);
                None
            }
        };
        let balance = self.balance().await?;
        let summary = self.ledger.summary().await;

        Ok(FaucetStats {
            address,
            balance_zec: balance.total_zec(),
            total_transfers: summary.count,
            total_sent_zec: summary.total_sent,
            last_transfer: summary.last_transfer,
        })
    }
}
