//! Core types for faucet transfers
//!
//! Defines transfer requests and results, the transfer state machine's
//! states, ledger entries, and balance snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Smallest units (zatoshis) per ZEC
pub const ZATOSHIS_PER_ZEC: u64 = 100_000_000;

/// Total ZEC supply in zatoshis; no single transfer can exceed it
pub const MAX_MONEY_ZATOSHIS: u64 = 21_000_000 * ZATOSHIS_PER_ZEC;

/// Convert ZEC to zatoshis, rounding to the nearest zatoshi
pub fn zec_to_zatoshis(zec: f64) -> u64 {
    (zec * ZATOSHIS_PER_ZEC as f64).round() as u64
}

/// Convert zatoshis to ZEC
pub fn zatoshis_to_zec(zatoshis: u64) -> f64 {
    zatoshis as f64 / ZATOSHIS_PER_ZEC as f64
}

/// A request to send faucet funds
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    /// Destination address
    pub to_address: String,

    /// Amount in ZEC
    pub amount: f64,

    /// Optional memo (dropped for transparent destinations)
    pub memo: Option<String>,
}

impl TransferRequest {
    pub fn new(to_address: impl Into<String>, amount: f64, memo: Option<String>) -> Result<Self> {
        let to_address = to_address.into().trim().to_string();
        if to_address.is_empty() {
            return Err(Error::InvalidAddress("address is required".to_string()));
        }
        if !amount.is_finite() || amount <= 0.0 {
            return Err(Error::InvalidAmount(format!(
                "amount must be a positive number of ZEC, got {}",
                amount
            )));
        }
        if amount * ZATOSHIS_PER_ZEC as f64 > MAX_MONEY_ZATOSHIS as f64 {
            return Err(Error::InvalidAmount(format!(
                "{} ZEC exceeds the total supply of {} ZEC",
                amount,
                zatoshis_to_zec(MAX_MONEY_ZATOSHIS)
            )));
        }
        if zec_to_zatoshis(amount) == 0 {
            return Err(Error::InvalidAmount(format!(
                "{} ZEC is less than one zatoshi",
                amount
            )));
        }

        Ok(Self {
            to_address,
            amount,
            memo: memo.filter(|m| !m.trim().is_empty()),
        })
    }

    /// Requested amount in zatoshis
    pub fn zatoshis(&self) -> u64 {
        zec_to_zatoshis(self.amount)
    }
}

/// States of the transfer state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    /// Waiting for the interactive prompt
    Ready,
    Syncing,
    /// Shielding transparent funds
    Shielding,
    /// Confirming the shielding proposal
    ShieldConfirming,
    BalanceCheck,
    Sending,
    Confirming,
    Done,
    Failed,
}

impl std::fmt::Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferState::Ready => write!(f, "ready"),
            TransferState::Syncing => write!(f, "syncing"),
            TransferState::Shielding => write!(f, "shielding"),
            TransferState::ShieldConfirming => write!(f, "shield confirming"),
            TransferState::BalanceCheck => write!(f, "balance check"),
            TransferState::Sending => write!(f, "sending"),
            TransferState::Confirming => write!(f, "confirming"),
            TransferState::Done => write!(f, "done"),
            TransferState::Failed => write!(f, "failed"),
        }
    }
}

/// Why a transfer failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The wallet process could not be started
    Launch,
    StartupTimeout,
    SyncTimeout,
    ShieldFailed,
    /// Balance output never arrived
    BalanceUnavailable,
    InsufficientFunds,
    SendFailed,
    ConfirmFailed,
    /// The wallet exited in the middle of the session
    ProcessExited,
    /// Writing to the session failed
    Io,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Launch => write!(f, "launch_failed"),
            FailureReason::StartupTimeout => write!(f, "startup_timeout"),
            FailureReason::SyncTimeout => write!(f, "sync_timeout"),
            FailureReason::ShieldFailed => write!(f, "shield_failed"),
            FailureReason::BalanceUnavailable => write!(f, "balance_unavailable"),
            FailureReason::InsufficientFunds => write!(f, "insufficient_funds"),
            FailureReason::SendFailed => write!(f, "send_failed"),
            FailureReason::ConfirmFailed => write!(f, "confirm_failed"),
            FailureReason::ProcessExited => write!(f, "process_exited"),
            FailureReason::Io => write!(f, "io_error"),
        }
    }
}

/// Outcome of one transfer, success and failure are exclusive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransferResult {
    Success {
        txid: String,
        timestamp: DateTime<Utc>,
    },
    Failure {
        reason: FailureReason,
        error: String,
    },
}

impl TransferResult {
    pub fn is_success(&self) -> bool {
        matches!(self, TransferResult::Success { .. })
    }

    pub fn txid(&self) -> Option<&str> {
        match self {
            TransferResult::Success { txid, .. } => Some(txid),
            TransferResult::Failure { .. } => None,
        }
    }

    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            TransferResult::Success { .. } => None,
            TransferResult::Failure { reason, .. } => Some(*reason),
        }
    }
}

/// One completed transfer in the history ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub timestamp: DateTime<Utc>,

    /// Destination address
    pub to_address: String,

    /// Amount in ZEC
    pub amount: f64,

    pub txid: String,

    #[serde(default)]
    pub memo: Option<String>,
}

impl HistoryEntry {
    pub fn new(request: &TransferRequest, txid: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            to_address: request.to_address.clone(),
            amount: request.amount,
            txid: txid.to_string(),
            memo: request.memo.clone(),
        }
    }
}

/// Per-pool balances parsed from wallet output, in zatoshis
///
/// `None` means the field was not present in the output, which is not the
/// same as a zero balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BalanceSnapshot {
    pub transparent: Option<u64>,
    pub sapling: Option<u64>,
    pub orchard: Option<u64>,
    pub spendable_sapling: Option<u64>,
    pub spendable_orchard: Option<u64>,
}

impl BalanceSnapshot {
    /// Confirmed balance over all pools; missing pools count as zero
    pub fn total(&self) -> u64 {
        [self.transparent, self.sapling, self.orchard]
            .iter()
            .map(|v| v.unwrap_or(0))
            .fold(0u64, u64::saturating_add)
    }

    pub fn total_zec(&self) -> f64 {
        zatoshis_to_zec(self.total())
    }

    /// Shielded funds available to a send
    ///
    /// Uses the wallet's spendable fields when it printed them, otherwise the
    /// confirmed sapling and orchard balances.
    pub fn spendable(&self) -> u64 {
        if self.spendable_sapling.is_some() || self.spendable_orchard.is_some() {
            self.spendable_sapling
                .unwrap_or(0)
                .saturating_add(self.spendable_orchard.unwrap_or(0))
        } else {
            self.sapling
                .unwrap_or(0)
                .saturating_add(self.orchard.unwrap_or(0))
        }
    }

    /// Whether any balance field was found at all
    pub fn parsed_any(&self) -> bool {
        [
            self.transparent,
            self.sapling,
            self.orchard,
            self.spendable_sapling,
            self.spendable_orchard,
        ]
        .iter()
        .any(Option::is_some)
    }
}

/// Faucet summary for the stats command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaucetStats {
    pub address: Option<String>,
    pub balance_zec: f64,
    pub total_transfers: usize,
    pub total_sent_zec: f64,
    pub last_transfer: Option<DateTime<Utc>>,
}
