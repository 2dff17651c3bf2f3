//! Command-line surface of the faucet

pub mod commands;
