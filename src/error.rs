//! Error types for the faucet

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the faucet
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Wallet process errors
    #[error("Failed to launch wallet process: {0}")]
    Launch(String),

    #[error("Timed out after {secs}s while {context}")]
    Timeout { context: String, secs: u64 },

    #[error("Wallet process exited unexpectedly: {0}")]
    ProcessExited(String),

    #[error("Wallet command failed: {0}")]
    Command(String),

    // Transfer errors
    #[error("Insufficient funds: {spendable} zatoshis spendable, {required} zatoshis required")]
    InsufficientFunds { spendable: u64, required: u64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Wallet rejected the transaction: {0}")]
    Rejected(String),

    // Address validation RPC errors
    #[error("RPC error: {0}")]
    Rpc(String),

    // History ledger errors
    #[error("History persistence failed: {0}")]
    Persistence(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Rpc(e.to_string())
    }
}
