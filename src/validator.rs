//! Address validation via the node's `validateaddress` RPC
//!
//! Used by the CLI before a transfer. The node decides whether an address is
//! well formed; on top of that the address must belong to the configured
//! network.

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::config::ValidatorConfig;
use crate::error::{Error, Result};

/// Outcome of validating one address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressValidation {
    pub is_valid: bool,
    /// Address as normalized by the node (input address if it gave none)
    pub address: String,
    pub message: String,
}

impl AddressValidation {
    fn valid(address: String) -> Self {
        Self {
            is_valid: true,
            message: format!("Address validated: {}", address),
            address,
        }
    }

    fn invalid(address: &str, message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            address: address.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<ValidateAddressResult>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Debug, Deserialize)]
struct ValidateAddressResult {
    #[serde(default)]
    isvalid: bool,
    #[serde(default)]
    address: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RpcError {
    #[serde(default)]
    message: Option<String>,
}

/// Address prefixes accepted on each network
pub fn network_prefixes(chain: &str) -> &'static [&'static str] {
    match chain {
        "mainnet" => &["t1", "t3", "u1", "zs"],
        "testnet" => &["tm", "t2", "utest", "ztestsapling"],
        _ => &["tm", "uregtest", "zregtestsapling"],
    }
}

/// JSON-RPC client for `validateaddress`
pub struct AddressValidator {
    client: reqwest::Client,
    config: ValidatorConfig,
    chain: String,
}

impl AddressValidator {
    pub fn new(config: ValidatorConfig, chain: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Config(format!("failed to build RPC client: {}", e)))?;

        Ok(Self {
            client,
            config,
            chain: chain.to_string(),
        })
    }

    /// Ask the node whether `address` is valid
    ///
    /// Transport failures are errors; a node that answers "invalid" is not.
    pub async fn validate(&self, address: &str) -> Result<AddressValidation> {
        let address = address.trim();
        if address.is_empty() {
            return Ok(AddressValidation::invalid(address, "Address is required"));
        }

        let body = json!({
            "jsonrpc": "2.0",
            "id": "validate_addr",
            "method": "validateaddress",
            "params": [address],
        });

        debug!("Validating address via {}", self.config.rpc_url);
        let resp = self
            .client
            .post(&self.config.rpc_url)
            .basic_auth(&self.config.rpc_user, Some(&self.config.rpc_password))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::Rpc("address validation timed out - node not responding".to_string())
                } else if e.is_connect() {
                    Error::Rpc(format!("cannot connect to {}", self.config.rpc_url))
                } else {
                    Error::from(e)
                }
            })?;

        if !resp.status().is_success() {
            return Err(Error::Rpc(format!(
                "validateaddress returned HTTP {}",
                resp.status()
            )));
        }

        let response: RpcResponse = resp.json().await?;
        let validation = interpret_response(response, address, &self.chain);
        if validation.is_valid {
            info!("{}", validation.message);
        } else {
            warn!("Address rejected: {}", validation.message);
        }
        Ok(validation)
    }
}

fn interpret_response(response: RpcResponse, address: &str, chain: &str) -> AddressValidation {
    if let Some(error) = response.error {
        let message = error
            .message
            .unwrap_or_else(|| "Unknown RPC error".to_string());
        return AddressValidation::invalid(
            address,
            format!("Address validation failed: {}", message),
        );
    }

    let Some(result) = response.result else {
        return AddressValidation::invalid(address, "Invalid Zcash address");
    };
    if !result.isvalid {
        return AddressValidation::invalid(address, "Invalid Zcash address");
    }

    if !network_prefixes(chain)
        .iter()
        .any(|prefix| address.starts_with(prefix))
    {
        return AddressValidation::invalid(
            address,
            format!("Address is not a valid {} address", chain),
        );
    }

    AddressValidation::valid(result.address.unwrap_or_else(|| address.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> RpcResponse {
        serde_json::from_str(body).unwrap()
    }

    const TADDR: &str = "tmBsTi2xWTjUdEXnuTceL7fecEQKeWaPDJd";

    #[test]
    fn test_valid_regtest_address() {
        let response = parse(&format!(
            r#"{{"result": {{"isvalid": true, "address": "{}"}}, "error": null, "id": "validate_addr"}}"#,
            TADDR
        ));
        let validation = interpret_response(response, TADDR, "regtest");
        assert!(validation.is_valid);
        assert_eq!(validation.address, TADDR);
    }

    #[test]
    fn test_node_says_invalid() {
        let response = parse(r#"{"result": {"isvalid": false}}"#);
        let validation = interpret_response(response, "tmNope", "regtest");
        assert!(!validation.is_valid);
        assert_eq!(validation.message, "Invalid Zcash address");
    }

    #[test]
    fn test_rpc_error_message_is_surfaced() {
        let response = parse(r#"{"result": null, "error": {"code": -5, "message": "bad checksum"}}"#);
        let validation = interpret_response(response, TADDR, "regtest");
        assert!(!validation.is_valid);
        assert!(validation.message.contains("bad checksum"));
    }

    #[test]
    fn test_mainnet_address_rejected_on_regtest() {
        let address = "t1KzZ5n2TPEGYXTZ3WYGL1AYEumEQaRoHaL";
        let response = parse(r#"{"result": {"isvalid": true}}"#);
        let validation = interpret_response(response, address, "regtest");
        assert!(!validation.is_valid);
        assert_eq!(validation.message, "Address is not a valid regtest address");
    }

    #[tokio::test]
    async fn test_empty_address_needs_no_rpc() {
        let validator = AddressValidator::new(ValidatorConfig::default(), "regtest").unwrap();
        let validation = validator.validate("   ").await.unwrap();
        assert!(!validation.is_valid);
        assert_eq!(validation.message, "Address is required");
    }

    #[tokio::test]
    async fn test_unreachable_node_is_rpc_error() {
        let config = ValidatorConfig {
            rpc_url: "http://127.0.0.1:9".to_string(),
            timeout_secs: 2,
            ..Default::default()
        };
        let validator = AddressValidator::new(config, "regtest").unwrap();
        assert!(matches!(
            validator.validate(TADDR).await,
            Err(Error::Rpc(_))
        ));
    }
}
