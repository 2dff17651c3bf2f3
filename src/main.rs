//! ZecKit Faucet - regtest funds from a zingo-cli wallet
//!
//! Drives an interactive `zingo-cli` session over a pseudo-terminal to
//! shield, check balance, send and confirm, and keeps a local history of
//! what it dispensed.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

// Use the library crate
use zeckit_faucet::cli::commands;
use zeckit_faucet::config::Config;

/// ZecKit Faucet - dispense regtest ZEC
#[derive(Parser)]
#[command(name = "faucet")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "faucet.toml", env = "FAUCET_CONFIG")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send funds to an address
    Send {
        /// Destination address
        address: String,

        /// Amount in ZEC (default from config)
        #[arg(short, long)]
        amount: Option<f64>,

        /// Memo (ignored for transparent addresses)
        #[arg(short, long)]
        memo: Option<String>,

        /// Do not ask the node to validate the address
        #[arg(long)]
        skip_validation: bool,

        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Show wallet balance per pool
    Balance,

    /// Show the faucet's addresses
    Address,

    /// View transfer history
    History {
        /// Number of records to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show faucet statistics
    Stats,

    /// Sync the wallet with the chain
    Sync,

    /// Validate an address with the node
    Validate {
        /// Address to check
        address: String,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check that the wallet and node are reachable
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("zeckit_faucet=info".parse()?),
        )
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        "Using wallet {} on {} (container: {})",
        config.wallet.data_dir,
        config.wallet.chain,
        if config.wallet.container.is_empty() {
            "none"
        } else {
            config.wallet.container.as_str()
        }
    );

    // Execute command
    let result = match cli.command {
        Commands::Send {
            address,
            amount,
            memo,
            skip_validation,
            yes,
        } => commands::send(&config, &address, amount, memo, skip_validation, yes).await,
        Commands::Balance => commands::balance(&config).await,
        Commands::Address => commands::address(&config).await,
        Commands::History { limit } => commands::history(&config, limit).await,
        Commands::Stats => commands::stats(&config).await,
        Commands::Sync => commands::sync(&config).await,
        Commands::Validate { address } => commands::validate(&config, &address).await,
        Commands::Config => commands::show_config(&config),
        Commands::Health => commands::health(&config).await,
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
