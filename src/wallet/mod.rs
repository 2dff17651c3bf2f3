//! Faucet wallet module
//!
//! Drives `zingo-cli` to dispense regtest funds:
//! - Transfer state machine over an interactive pty session
//! - One-shot runner for read-only queries and manual sync
//! - Output parsing for balances, addresses and txids
//! - JSON history ledger of completed transfers
//!
//! # Architecture
//!
//! ```text
//! FaucetWallet ─┬─ SessionLauncher → TransferSequencer → StepTable
//!               │                          ↓
//!               ├─ CommandRunner ──────→ parser
//!               └─ HistoryLedger
//! ```

pub mod history;
pub mod manager;
pub mod parser;
pub mod protocol;
pub mod runner;
pub mod sequencer;
pub mod types;

pub use history::{HistoryLedger, HistorySummary};
pub use manager::FaucetWallet;
pub use protocol::{Action, CommandStep, Signal, StepTable, TransferSettings};
pub use runner::CommandRunner;
pub use sequencer::{TransferFailure, TransferSequencer};
pub use types::{
    zatoshis_to_zec, zec_to_zatoshis, BalanceSnapshot, FailureReason, FaucetStats, HistoryEntry,
    TransferRequest, TransferResult, TransferState, ZATOSHIS_PER_ZEC,
};
