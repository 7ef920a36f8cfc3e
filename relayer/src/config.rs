// Copyright (c) Starcoin, Inc.
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context};
use bridge_relayer_types::{parse_address, RelayResult};
use ethers::types::{Address, U256};
use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use serde_with::DurationSeconds;

/// Destination chain selector; picks the driver implementation at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Bsc,
    Heco,
    Matic,
    Iotex,
}

impl Chain {
    /// heco, bsc and matic expose the same JSON-RPC and gas market as
    /// ethereum; only iotex needs its own driver.
    pub fn is_ethereum_family(&self) -> bool {
        !matches!(self, Chain::Iotex)
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ethereum" => Ok(Chain::Ethereum),
            "bsc" => Ok(Chain::Bsc),
            "heco" => Ok(Chain::Heco),
            "matic" => Ok(Chain::Matic),
            "iotex" => Ok(Chain::Iotex),
            other => Err(anyhow!("unknown chain name '{}'", other)),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct RelayerConfig {
    // Destination chain, selects the driver implementation.
    #[serde(default = "default_chain")]
    pub chain: Chain,
    // Destination-chain JSON-RPC endpoint.
    #[serde(default)]
    pub client_url: String,
    // 32-byte relayer signing key, hex.
    #[serde(default)]
    pub private_key: String,
    // Validator contract address on the destination chain.
    #[serde(default)]
    pub validator_address: String,
    // Service-loop period, seconds.
    #[serde_as(as = "DurationSeconds<u64>")]
    #[serde(default = "default_interval")]
    pub interval: Duration,
    // Confirmations required before destination reads are trusted.
    #[serde(default = "default_eth_confirm_block_number")]
    pub eth_confirm_block_number: u64,
    // Gas-pricing parameters for initial submission and speed-up.
    #[serde(default = "default_eth_gas_price_limit")]
    pub eth_gas_price_limit: u64,
    #[serde(default)]
    pub eth_gas_price_deviation: i64,
    #[serde(default)]
    pub eth_gas_price_gap: u64,
    // RPC listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    // Postgres endpoint.
    #[serde(default)]
    pub database_url: String,
    #[serde(default = "default_transfer_table_name")]
    pub transfer_table_name: String,
    #[serde(default = "default_witness_table_name")]
    pub witness_table_name: String,
    // Alert endpoint for balance warnings and invariant violations.
    #[serde(default)]
    pub slack_web_hook: String,
    // Source token -> destination token. Transfers of unmapped tokens are
    // never submitted.
    #[serde(default)]
    pub token_pairs: BTreeMap<String, String>,
}

fn default_chain() -> Chain {
    Chain::Iotex
}

fn default_interval() -> Duration {
    Duration::from_secs(3600)
}

fn default_eth_confirm_block_number() -> u64 {
    20
}

fn default_eth_gas_price_limit() -> u64 {
    120_000_000_000
}

fn default_port() -> u16 {
    8080
}

fn default_transfer_table_name() -> String {
    "relayer_transfers".to_string()
}

fn default_witness_table_name() -> String {
    "relayer_witnesses".to_string()
}

impl Default for RelayerConfig {
    fn default() -> Self {
        serde_yaml::from_str("{}").expect("default config must deserialize")
    }
}

impl RelayerConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {:?}", path))?;
        let mut config: RelayerConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse config file {:?}", path))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Environment variables shadow their file counterparts, so deployments
    /// can keep secrets out of the config file.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        if let Ok(port) = std::env::var("RELAYER_PORT") {
            self.port = port
                .parse()
                .with_context(|| format!("invalid RELAYER_PORT '{}'", port))?;
        }
        if let Ok(url) = std::env::var("RELAYER_CLIENT_URL") {
            self.client_url = url;
        }
        if let Ok(key) = std::env::var("RELAYER_PRIVATE_KEY") {
            self.private_key = key;
        }
        if let Ok(address) = std::env::var("RELAYER_VALIDATOR_ADDRESS") {
            self.validator_address = address;
        }
        if let Ok(chain) = std::env::var("RELAYER_CHAIN") {
            self.chain = chain.parse()?;
        }
        Ok(())
    }

    pub fn parsed_validator_address(&self) -> RelayResult<Address> {
        parse_address(&self.validator_address)
    }

    pub fn token_pair_map(&self) -> RelayResult<HashMap<Address, Address>> {
        self.token_pairs
            .iter()
            .map(|(source, destination)| Ok((parse_address(source)?, parse_address(destination)?)))
            .collect()
    }

    pub fn gas_price_limit(&self) -> U256 {
        U256::from(self.eth_gas_price_limit)
    }

    pub fn gas_price_gap(&self) -> U256 {
        U256::from(self.eth_gas_price_gap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = RelayerConfig::default();
        assert_eq!(config.chain, Chain::Iotex);
        assert_eq!(config.interval, Duration::from_secs(3600));
        assert_eq!(config.eth_confirm_block_number, 20);
        assert_eq!(config.eth_gas_price_limit, 120_000_000_000);
        assert_eq!(config.eth_gas_price_deviation, 0);
        assert_eq!(config.eth_gas_price_gap, 0);
        assert_eq!(config.port, 8080);
        assert_eq!(config.transfer_table_name, "relayer_transfers");
        assert_eq!(config.witness_table_name, "relayer_witnesses");
        assert!(config.token_pairs.is_empty());
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r#"
chain: ethereum
client-url: https://mainnet.example/rpc
private-key: 0101010101010101010101010101010101010101010101010101010101010101
validator-address: "0x0000000000000000000000000000000000000001"
interval: 60
eth-confirm-block-number: 12
eth-gas-price-limit: 200000000000
eth-gas-price-deviation: -10
eth-gas-price-gap: 5000000000
port: 9000
database-url: postgres://localhost/relayer
transfer-table-name: transfers
witness-table-name: witnesses
slack-web-hook: https://hooks.slack.com/services/x
token-pairs:
  "0x0000000000000000000000000000000000000002": "0x0000000000000000000000000000000000000003"
"#;
        let config: RelayerConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.chain, Chain::Ethereum);
        assert!(config.chain.is_ethereum_family());
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.eth_gas_price_deviation, -10);
        assert_eq!(config.port, 9000);
        let pairs = config.token_pair_map().unwrap();
        assert_eq!(
            pairs.get(&Address::from_low_u64_be(2)),
            Some(&Address::from_low_u64_be(3))
        );
    }

    #[test]
    fn test_chain_parsing() {
        assert_eq!("iotex".parse::<Chain>().unwrap(), Chain::Iotex);
        assert!(!Chain::Iotex.is_ethereum_family());
        for name in ["ethereum", "bsc", "heco", "matic"] {
            assert!(name.parse::<Chain>().unwrap().is_ethereum_family());
        }
        assert!("solana".parse::<Chain>().is_err());
    }

    #[test]
    fn test_env_overrides_shadow_config() {
        let mut config = RelayerConfig::default();
        std::env::set_var("RELAYER_PORT", "9123");
        std::env::set_var("RELAYER_CLIENT_URL", "https://override.example/rpc");
        std::env::set_var("RELAYER_CHAIN", "bsc");
        config.apply_env_overrides().unwrap();
        std::env::remove_var("RELAYER_PORT");
        std::env::remove_var("RELAYER_CLIENT_URL");
        std::env::remove_var("RELAYER_CHAIN");

        assert_eq!(config.port, 9123);
        assert_eq!(config.client_url, "https://override.example/rpc");
        assert_eq!(config.chain, Chain::Bsc);

        // A malformed port override is a startup error, not a silent default
        std::env::set_var("RELAYER_PORT", "not-a-port");
        let result = config.apply_env_overrides();
        std::env::remove_var("RELAYER_PORT");
        assert!(result.is_err());
    }
}
