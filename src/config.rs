//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub faucet: FaucetConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub validator: ValidatorConfig,
}

/// How to reach the zingo-cli wallet
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Wallet data directory inside the wallet container
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Lightwalletd / zaino backend address
    #[serde(default = "default_server_uri")]
    pub server_uri: String,
    /// Chain passed to `--chain`: regtest, testnet or mainnet
    #[serde(default = "default_chain")]
    pub chain: String,
    /// Container running the wallet; empty runs the binary on the host
    #[serde(default = "default_container")]
    pub container: String,
    /// Wallet binary name or path
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Value of TERM for interactive sessions
    #[serde(default = "default_term")]
    pub term: String,
}

/// Step timeouts (seconds)
#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutConfig {
    /// Waiting for the first interactive prompt
    #[serde(default = "default_startup_secs")]
    pub startup_secs: u64,
    /// Waiting for `sync run` to report
    #[serde(default = "default_sync_secs")]
    pub sync_secs: u64,
    /// Generic command step (balance, send, shield)
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    /// Waiting for `confirm` to report transaction ids
    #[serde(default = "default_confirm_secs")]
    pub confirm_secs: u64,
    /// Flat timeout for non-interactive queries
    #[serde(default = "default_query_secs")]
    pub query_secs: u64,
    /// Upper bound on polling for freshly shielded funds
    #[serde(default = "default_shield_settle_secs")]
    pub shield_settle_secs: u64,
    /// Interval between balance polls while shielded funds settle
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Delay when a sync is already running
    #[serde(default = "default_sync_running_delay_secs")]
    pub sync_running_delay_secs: u64,
    /// Grace period for the wallet to exit after `quit`
    #[serde(default = "default_quit_grace_secs")]
    pub quit_grace_secs: u64,
}

/// Faucet dispensing rules
#[derive(Debug, Clone, Deserialize)]
pub struct FaucetConfig {
    /// Fee reserve added to every requested amount (zatoshis)
    #[serde(default = "default_fee_reserve")]
    pub fee_reserve_zatoshis: u64,
    #[serde(default = "default_amount")]
    pub default_amount: f64,
    #[serde(default = "default_min_amount")]
    pub min_amount: f64,
    #[serde(default = "default_max_amount")]
    pub max_amount: f64,
    /// Ask for confirmation above this amount (ZEC)
    #[serde(default = "default_confirm_above")]
    pub confirm_above: f64,
    /// Shield transparent funds before every transfer
    #[serde(default = "default_true")]
    pub shield_before_send: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: PathBuf,
}

/// Node JSON-RPC used for `validateaddress`
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_rpc_url")]
    pub rpc_url: String,
    #[serde(default = "default_rpc_user")]
    pub rpc_user: String,
    #[serde(default = "default_rpc_password")]
    pub rpc_password: String,
    #[serde(default = "default_rpc_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            server_uri: default_server_uri(),
            chain: default_chain(),
            container: default_container(),
            binary: default_binary(),
            term: default_term(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_secs: default_startup_secs(),
            sync_secs: default_sync_secs(),
            step_secs: default_step_secs(),
            confirm_secs: default_confirm_secs(),
            query_secs: default_query_secs(),
            shield_settle_secs: default_shield_settle_secs(),
            poll_interval_secs: default_poll_interval_secs(),
            sync_running_delay_secs: default_sync_running_delay_secs(),
            quit_grace_secs: default_quit_grace_secs(),
        }
    }
}

impl Default for FaucetConfig {
    fn default() -> Self {
        Self {
            fee_reserve_zatoshis: default_fee_reserve(),
            default_amount: default_amount(),
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            confirm_above: default_confirm_above(),
            shield_before_send: true,
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
        }
    }
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rpc_url: default_rpc_url(),
            rpc_user: default_rpc_user(),
            rpc_password: default_rpc_password(),
            timeout_secs: default_rpc_timeout_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn startup(&self) -> Duration {
        Duration::from_secs(self.startup_secs)
    }

    pub fn sync(&self) -> Duration {
        Duration::from_secs(self.sync_secs)
    }

    pub fn step(&self) -> Duration {
        Duration::from_secs(self.step_secs)
    }

    pub fn confirm(&self) -> Duration {
        Duration::from_secs(self.confirm_secs)
    }

    pub fn query(&self) -> Duration {
        Duration::from_secs(self.query_secs)
    }

    pub fn shield_settle(&self) -> Duration {
        Duration::from_secs(self.shield_settle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn sync_running_delay(&self) -> Duration {
        Duration::from_secs(self.sync_running_delay_secs)
    }

    pub fn quit_grace(&self) -> Duration {
        Duration::from_secs(self.quit_grace_secs)
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("wallet.data_dir", default_data_dir())?
            .set_default("wallet.server_uri", default_server_uri())?
            .set_default("wallet.chain", default_chain())?
            .set_default("history.path", default_history_path().display().to_string())?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix FAUCET_)
            .add_source(
                config::Environment::with_prefix("FAUCET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if !matches!(self.wallet.chain.as_str(), "regtest" | "testnet" | "mainnet") {
            anyhow::bail!(
                "wallet.chain must be regtest, testnet or mainnet, got {}",
                self.wallet.chain
            );
        }

        if self.wallet.data_dir.is_empty() {
            anyhow::bail!("wallet.data_dir must not be empty");
        }

        if self.wallet.binary.is_empty() {
            anyhow::bail!("wallet.binary must not be empty");
        }

        // Validate amounts
        if self.faucet.min_amount <= 0.0 {
            anyhow::bail!("faucet.min_amount must be positive");
        }

        if self.faucet.min_amount > self.faucet.max_amount {
            anyhow::bail!(
                "faucet.min_amount ({}) exceeds faucet.max_amount ({})",
                self.faucet.min_amount,
                self.faucet.max_amount
            );
        }

        if self.faucet.default_amount < self.faucet.min_amount
            || self.faucet.default_amount > self.faucet.max_amount
        {
            anyhow::bail!(
                "faucet.default_amount must be between {} and {}",
                self.faucet.min_amount,
                self.faucet.max_amount
            );
        }

        // Every step needs a bounded wait
        let t = &self.timeouts;
        for (name, secs) in [
            ("startup_secs", t.startup_secs),
            ("sync_secs", t.sync_secs),
            ("step_secs", t.step_secs),
            ("confirm_secs", t.confirm_secs),
            ("query_secs", t.query_secs),
            ("poll_interval_secs", t.poll_interval_secs),
        ] {
            if secs == 0 {
                anyhow::bail!("timeouts.{} must be greater than zero", name);
            }
        }

        if t.shield_settle_secs < t.poll_interval_secs {
            tracing::warn!(
                "timeouts.shield_settle_secs is shorter than poll_interval_secs - shielded funds will not be polled"
            );
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Wallet:
    binary: {}
    container: {}
    data_dir: {}
    server: {}
    chain: {}
  Timeouts:
    startup: {}s
    sync: {}s
    step: {}s
    confirm: {}s
    query: {}s
    shield_settle: {}s (poll every {}s)
  Faucet:
    amount: {} ZEC (min {}, max {})
    fee_reserve: {} zatoshis
    shield_before_send: {}
  History:
    path: {}
  Validator:
    enabled: {}
    rpc_url: {}
    rpc_user: {}
    rpc_password: {}
"#,
            self.wallet.binary,
            if self.wallet.container.is_empty() {
                "(host)"
            } else {
                &self.wallet.container
            },
            self.wallet.data_dir,
            self.wallet.server_uri,
            self.wallet.chain,
            self.timeouts.startup_secs,
            self.timeouts.sync_secs,
            self.timeouts.step_secs,
            self.timeouts.confirm_secs,
            self.timeouts.query_secs,
            self.timeouts.shield_settle_secs,
            self.timeouts.poll_interval_secs,
            self.faucet.default_amount,
            self.faucet.min_amount,
            self.faucet.max_amount,
            self.faucet.fee_reserve_zatoshis,
            self.faucet.shield_before_send,
            self.history.path.display(),
            self.validator.enabled,
            self.validator.rpc_url,
            self.validator.rpc_user,
            if self.validator.rpc_password.is_empty() {
                "(not set)"
            } else {
                "***"
            },
        )
    }
}

fn default_data_dir() -> String {
    "/var/zingo".to_string()
}

fn default_server_uri() -> String {
    "http://lightwalletd:9067".to_string()
}

fn default_chain() -> String {
    "regtest".to_string()
}

fn default_container() -> String {
    "zeckit-zingo-wallet".to_string()
}

fn default_binary() -> String {
    "zingo-cli".to_string()
}

fn default_term() -> String {
    "xterm".to_string()
}

fn default_startup_secs() -> u64 {
    180
}

fn default_sync_secs() -> u64 {
    300
}

fn default_step_secs() -> u64 {
    60
}

fn default_confirm_secs() -> u64 {
    120
}

fn default_query_secs() -> u64 {
    30
}

fn default_shield_settle_secs() -> u64 {
    120
}

fn default_poll_interval_secs() -> u64 {
    5
}

fn default_sync_running_delay_secs() -> u64 {
    5
}

fn default_quit_grace_secs() -> u64 {
    5
}

fn default_fee_reserve() -> u64 {
    10_000
}

fn default_amount() -> f64 {
    10.0
}

fn default_min_amount() -> f64 {
    0.01
}

fn default_max_amount() -> f64 {
    100.0
}

fn default_confirm_above() -> f64 {
    50.0
}

fn default_history_path() -> PathBuf {
    PathBuf::from("/var/zingo/faucet-history.json")
}

fn default_rpc_url() -> String {
    "http://zebra:18232".to_string()
}

fn default_rpc_user() -> String {
    "zcashrpc".to_string()
}

fn default_rpc_password() -> String {
    "notsecure".to_string()
}

fn default_rpc_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.wallet.chain, "regtest");
        assert_eq!(config.faucet.fee_reserve_zatoshis, 10_000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("faucet.toml");
        std::fs::write(
            &path,
            r#"
[wallet]
container = ""
binary = "/usr/local/bin/zingo-cli"

[faucet]
fee_reserve_zatoshis = 20000
min_amount = 0.5
max_amount = 5.0
default_amount = 1.0

[timeouts]
confirm_secs = 30
"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert!(config.wallet.container.is_empty());
        assert_eq!(config.wallet.binary, "/usr/local/bin/zingo-cli");
        assert_eq!(config.faucet.fee_reserve_zatoshis, 20_000);
        assert_eq!(config.timeouts.confirm(), Duration::from_secs(30));
        // Untouched sections keep their defaults
        assert_eq!(config.timeouts.startup_secs, 180);
        assert_eq!(config.wallet.data_dir, "/var/zingo");
    }

    #[test]
    fn test_rejects_inverted_amount_range() {
        let mut config = Config::default();
        config.faucet.min_amount = 10.0;
        config.faucet.max_amount = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_chain() {
        let mut config = Config::default();
        config.wallet.chain = "signet".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let mut config = Config::default();
        config.timeouts.confirm_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_masked_display_hides_password() {
        let config = Config::default();
        let display = config.masked_display();
        assert!(!display.contains("notsecure"));
        assert!(display.contains("rpc_password: ***"));
    }
}
