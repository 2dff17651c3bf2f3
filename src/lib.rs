//! ZecKit Faucet Library
//!
//! Regtest faucet that automates the `zingo-cli` wallet over a pty.

pub mod cli;
pub mod config;
pub mod error;
pub mod session;
pub mod validator;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
