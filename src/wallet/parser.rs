//! Output parser for zingo-cli text
//!
//! Extracts balances, addresses and transaction ids from captured wallet
//! output. Output is noisy (sync progress, log lines, JSON fragments), so
//! every rule searches rather than parses. Nothing here fails: a missing
//! value yields `None`, zero or an empty list and the caller decides whether
//! that matters.

use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

use super::types::BalanceSnapshot;

/// Address prefixes that only carry transparent receivers
pub const TRANSPARENT_PREFIXES: &[&str] = &["tm", "t1", "t3"];

static TXID: OnceLock<Regex> = OnceLock::new();
static TRANSPARENT_ADDRESS: OnceLock<Regex> = OnceLock::new();
static SYNC_ERROR: OnceLock<Regex> = OnceLock::new();
static BALANCE_FIELD: OnceLock<Regex> = OnceLock::new();
static UNIFIED_ADDRESS: OnceLock<Regex> = OnceLock::new();

fn txid_pattern() -> &'static Regex {
    TXID.get_or_init(|| {
        // Exactly 64 lowercase hex digits, not part of a longer hex run
        Regex::new(r"(?:^|[^0-9A-Fa-f])([0-9a-f]{64})(?:[^0-9A-Fa-f]|$)")
            .expect("Invalid txid regex")
    })
}

fn transparent_address_pattern() -> &'static Regex {
    TRANSPARENT_ADDRESS.get_or_init(|| {
        Regex::new(r"\b(?:tm|t1|t3)[1-9A-HJ-NP-Za-km-z]{30,}").expect("Invalid t-address regex")
    })
}

fn sync_error_pattern() -> &'static Regex {
    SYNC_ERROR.get_or_init(|| {
        Regex::new(r"(?i)sync(?:ing)?\s+(?:error|failed)").expect("Invalid sync error regex")
    })
}

fn balance_field_pattern() -> &'static Regex {
    BALANCE_FIELD.get_or_init(|| {
        // field_name: 1_000_000  or  "field_name": 1000000
        Regex::new(r#""?([a-z_]+_balance)"?\s*:\s*([0-9][0-9_]*)"#)
            .expect("Invalid balance field regex")
    })
}

fn unified_address_pattern() -> &'static Regex {
    UNIFIED_ADDRESS.get_or_init(|| {
        // Longest prefixes first; the body is at least 70 alphanumerics
        Regex::new(r"(?:uregtest1|utest1|u1)[A-Za-z0-9]{70,}")
            .expect("Invalid unified address regex")
    })
}

/// Parse a digit string that may use `_` as a thousands separator
fn parse_amount(digits: &str) -> Option<u64> {
    digits.replace('_', "").parse().ok()
}

/// Parse the per-pool balances printed by `balance`
///
/// The first occurrence of each field wins. When nothing adds up to a
/// non-zero total but the text clearly talks about balances, a warning is
/// logged: a real zero and an unrecognised format look the same otherwise.
pub fn parse_balance(text: &str) -> BalanceSnapshot {
    let mut snapshot = BalanceSnapshot::default();

    for caps in balance_field_pattern().captures_iter(text) {
        let Some(value) = parse_amount(&caps[2]) else {
            continue;
        };
        let slot = match &caps[1] {
            "confirmed_transparent_balance" => &mut snapshot.transparent,
            "confirmed_sapling_balance" => &mut snapshot.sapling,
            "confirmed_orchard_balance" => &mut snapshot.orchard,
            "spendable_sapling_balance" => &mut snapshot.spendable_sapling,
            "spendable_orchard_balance" => &mut snapshot.spendable_orchard,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    if snapshot.total() == 0 && snapshot.spendable() == 0 && text.to_lowercase().contains("balance")
    {
        if snapshot.parsed_any() {
            tracing::debug!("Wallet reports a zero balance");
        } else {
            warn!(
                "Balance output contained no recognised balance fields; treating as zero ({} bytes)",
                text.len()
            );
        }
    }

    snapshot
}

/// First unified address with the given network prefix (e.g. `uregtest1`)
///
/// The body after the prefix must be at least 70 alphanumeric characters.
pub fn first_unified_address(text: &str, prefix: &str) -> Option<String> {
    unified_address_pattern()
        .find_iter(text)
        .map(|m| m.as_str())
        .find(|address| address.starts_with(prefix))
        .map(str::to_string)
}

/// Unified address prefix for a chain name
pub fn unified_prefix(chain: &str) -> &'static str {
    match chain {
        "mainnet" => "u1",
        "testnet" => "utest1",
        _ => "uregtest1",
    }
}

/// First transparent address (`tm…`, `t1…`, `t3…`)
pub fn first_transparent_address(text: &str) -> Option<String> {
    transparent_address_pattern()
        .find(text)
        .map(|m| m.as_str().to_string())
}

/// Whether the destination only has a transparent receiver
pub fn is_transparent_address(address: &str) -> bool {
    TRANSPARENT_PREFIXES
        .iter()
        .any(|prefix| address.starts_with(prefix))
}

/// First transaction id in the text
pub fn first_txid(text: &str) -> Option<String> {
    txid_pattern()
        .captures(text)
        .map(|caps| caps[1].to_string())
}

/// Whether a sync transcript reports an error
pub fn reports_sync_error(text: &str) -> bool {
    sync_error_pattern().is_match(text)
}
