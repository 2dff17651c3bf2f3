//! CLI command implementations

use anyhow::Result;
use dialoguer::Confirm;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::validator::AddressValidator;
use crate::wallet::{FaucetWallet, TransferRequest, TransferResult, zatoshis_to_zec};

/// Send faucet funds to an address
pub async fn send(
    config: &Config,
    address: &str,
    amount: Option<f64>,
    memo: Option<String>,
    skip_validation: bool,
    yes: bool,
) -> Result<()> {
    let amount = amount.unwrap_or(config.faucet.default_amount);
    let (min, max) = (config.faucet.min_amount, config.faucet.max_amount);
    if !(min..=max).contains(&amount) {
        anyhow::bail!("Amount must be between {} and {} ZEC, got {}", min, max, amount);
    }

    let mut to_address = address.trim().to_string();
    if skip_validation || !config.validator.enabled {
        warn!("Skipping address validation for {}", to_address);
    } else {
        let validator = AddressValidator::new(config.validator.clone(), &config.wallet.chain)?;
        let validation = validator
            .validate(&to_address)
            .await
            .map_err(|e| anyhow::anyhow!("Could not validate address: {}", e))?;
        if !validation.is_valid {
            anyhow::bail!("{}", validation.message);
        }
        to_address = validation.address;
    }

    // Confirmation prompt for large amounts (unless --yes)
    if amount > config.faucet.confirm_above && !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Send {} ZEC to {}?", amount, to_address))
            .default(false)
            .interact()?;

        if !confirmed {
            info!("Send cancelled by user");
            return Ok(());
        }
    }

    let request = TransferRequest::new(to_address, amount, memo)?;
    let wallet = FaucetWallet::from_config(config);

    match wallet.transfer(request.clone()).await {
        TransferResult::Success { txid, timestamp } => {
            println!("\nTransfer sent!");
            println!("Amount:    {} ZEC", request.amount);
            println!("To:        {}", request.to_address);
            println!("TXID:      {}", txid);
            println!("Timestamp: {}", timestamp.to_rfc3339());
            Ok(())
        }
        TransferResult::Failure { reason, error } => {
            error!("Transfer failed ({}): {}", reason, error);
            anyhow::bail!("Transfer failed ({}): {}", reason, error)
        }
    }
}

/// Show the wallet balance per pool
pub async fn balance(config: &Config) -> Result<()> {
    let wallet = FaucetWallet::from_config(config);
    let snapshot = wallet.balance().await?;

    let pool = |value: Option<u64>| match value {
        Some(zats) => format!("{:.8} ZEC", zatoshis_to_zec(zats)),
        None => "-".to_string(),
    };

    println!("\n=== FAUCET BALANCE ===\n");
    println!("Transparent: {}", pool(snapshot.transparent));
    println!("Sapling:     {}", pool(snapshot.sapling));
    println!("Orchard:     {}", pool(snapshot.orchard));
    println!("Total:       {:.8} ZEC", snapshot.total_zec());
    println!("Spendable:   {:.8} ZEC", zatoshis_to_zec(snapshot.spendable()));

    if !snapshot.parsed_any() {
        warn!("Wallet output contained no balance fields; figures above may be wrong");
    }
    Ok(())
}

/// Show the faucet's receiving addresses
pub async fn address(config: &Config) -> Result<()> {
    let wallet = FaucetWallet::from_config(config);

    let unified = wallet.address().await?;
    println!("Unified:     {}", unified);

    match wallet.transparent_address().await {
        Ok(transparent) => println!("Transparent: {}", transparent),
        Err(e) => warn!("No transparent address: {}", e),
    }
    Ok(())
}

/// Show recent transfers
pub async fn history(config: &Config, limit: usize) -> Result<()> {
    let wallet = FaucetWallet::from_config(config);
    let entries = wallet.history(limit).await;

    println!("\n=== TRANSFER HISTORY ({} shown) ===\n", entries.len());
    println!(
        "{:<25} {:>12} {:<24} {}",
        "TIME", "AMOUNT", "TO", "TXID"
    );
    println!("{}", "-".repeat(100));

    for entry in &entries {
        let to = abbreviate(&entry.to_address, 20);
        println!(
            "{:<25} {:>12.8} {:<24} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.amount,
            to,
            entry.txid
        );
        if let Some(memo) = &entry.memo {
            println!("{:<25} memo: {}", "", memo);
        }
    }

    println!();
    Ok(())
}

/// Show faucet statistics
pub async fn stats(config: &Config) -> Result<()> {
    let wallet = FaucetWallet::from_config(config);
    let stats = wallet.stats().await?;

    println!("\n=== FAUCET STATS ===\n");
    println!(
        "Address:         {}",
        stats.address.as_deref().unwrap_or("unknown")
    );
    println!("Balance:         {:.8} ZEC", stats.balance_zec);
    println!("Total transfers: {}", stats.total_transfers);
    println!("Total sent:      {:.8} ZEC", stats.total_sent_zec);
    match stats.last_transfer {
        Some(at) => println!("Last transfer:   {}", at.to_rfc3339()),
        None => println!("Last transfer:   never"),
    }
    Ok(())
}

/// Sync the wallet with the chain
pub async fn sync(config: &Config) -> Result<()> {
    info!("Syncing wallet with blockchain...");
    let wallet = FaucetWallet::from_config(config);
    wallet.sync().await?;
    println!("Wallet synced with blockchain");
    Ok(())
}

/// Validate an address against the node
pub async fn validate(config: &Config, address: &str) -> Result<()> {
    let validator = AddressValidator::new(config.validator.clone(), &config.wallet.chain)?;
    let validation = validator.validate(address).await?;

    if validation.is_valid {
        println!("VALID: {}", validation.address);
        Ok(())
    } else {
        anyhow::bail!("INVALID: {}", validation.message)
    }
}

/// Show configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.masked_display());
    Ok(())
}

/// Check that the wallet and the node are reachable
pub async fn health(config: &Config) -> Result<()> {
    println!("\n=== FAUCET HEALTH CHECK ===\n");

    let mut all_healthy = true;
    let wallet = FaucetWallet::from_config(config);

    print!("Wallet (zingo-cli)... ");
    match wallet.address().await {
        Ok(address) => println!("OK ({})", address),
        Err(e) => {
            println!("FAILED: {}", e);
            all_healthy = false;
        }
    }

    if config.validator.enabled {
        print!("Node RPC... ");
        // Any well-formed answer means the node is up
        let checked = match AddressValidator::new(config.validator.clone(), &config.wallet.chain) {
            Ok(validator) => validator.validate("tmHealthCheck").await,
            Err(e) => Err(e),
        };
        match checked {
            Ok(_) => println!("OK"),
            Err(e) => {
                println!("FAILED: {}", e);
                all_healthy = false;
            }
        }
    } else {
        println!("Node RPC... SKIPPED (validator disabled)");
    }

    println!();
    if !all_healthy {
        anyhow::bail!("One or more health checks failed");
    }
    println!("All systems healthy");
    Ok(())
}

/// First `max` characters of `text`, with `...` when it was cut
fn abbreviate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        format!("{}...", text.chars().take(max).collect::<String>())
    } else {
        text.to_string()
    }
}
