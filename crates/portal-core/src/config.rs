//! Configuration types for Thunder Portal
//!
//! Loaded from an optional JSON file, then overridden by environment
//! variables for endpoints and credentials.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Network, SwapMode};

/// Bitcoin node and HTLC micro-API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoinConfig {
    /// Node RPC URL (e.g., "http://localhost:18443")
    pub rpc_url: String,

    #[serde(default)]
    pub rpc_user: String,

    #[serde(default)]
    pub rpc_password: String,

    /// Wallet used for funding; wallet-scoped RPC calls go to `/wallet/<name>`
    #[serde(default = "default_wallet")]
    pub wallet: String,

    #[serde(default)]
    pub network: Network,

    /// HTLC micro-API base URL
    pub htlc_api_url: String,

    /// Sent as `X-API-Key`
    #[serde(default)]
    pub htlc_api_key: String,

    /// Compressed pubkey allowed to claim the HTLC
    pub claimer_pubkey: String,

    /// Fixed funding fee
    #[serde(default = "default_fee_sats")]
    pub fee_sats: u64,

    #[serde(default = "default_confirmations")]
    pub confirmations: u32,

    #[serde(default = "default_poll_secs")]
    pub confirmation_poll_secs: u64,

    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
}

fn default_wallet() -> String {
    "test_wallet".to_string()
}

fn default_fee_sats() -> u64 {
    1000
}

fn default_confirmations() -> u32 {
    1
}

fn default_poll_secs() -> u64 {
    5
}

fn default_confirmation_timeout_secs() -> u64 {
    300
}

impl Default for BitcoinConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:18443".to_string(),
            rpc_user: "thunderportal".to_string(),
            rpc_password: "thunderportal123".to_string(),
            wallet: default_wallet(),
            network: Network::Regtest,
            htlc_api_url: "http://localhost:3000/v1".to_string(),
            htlc_api_key: "demo-key-123".to_string(),
            claimer_pubkey: "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798"
                .to_string(),
            fee_sats: default_fee_sats(),
            confirmations: default_confirmations(),
            confirmation_poll_secs: default_poll_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
        }
    }
}

/// Ethereum node and contract settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EthereumConfig {
    pub rpc_url: String,

    /// Escrow factory contract
    pub factory_address: String,

    /// Limit Order Protocol contract, required for `limit_order` mode
    #[serde(default)]
    pub limit_order_protocol: Option<String>,

    /// Node-managed account transactions are sent from. When empty the
    /// first `eth_accounts` entry is used.
    #[serde(default)]
    pub signer_address: String,

    /// Escrow receiver (the party claiming with the preimage). Defaults to the signer.
    #[serde(default)]
    pub receiver_address: String,

    #[serde(default = "default_create_gas")]
    pub create_gas: u64,

    #[serde(default = "default_call_gas")]
    pub call_gas: u64,

    #[serde(default = "default_poll_secs")]
    pub receipt_poll_secs: u64,

    #[serde(default = "default_receipt_timeout_secs")]
    pub receipt_timeout_secs: u64,
}

fn default_create_gas() -> u64 {
    2_000_000
}

fn default_call_gas() -> u64 {
    300_000
}

fn default_receipt_timeout_secs() -> u64 {
    120
}

impl Default for EthereumConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            factory_address: "0x5FbDB2315678afecb367f032d93F642f64180aa3".to_string(),
            limit_order_protocol: None,
            signer_address: String::new(),
            receiver_address: String::new(),
            create_gas: default_create_gas(),
            call_gas: default_call_gas(),
            receipt_poll_secs: default_poll_secs(),
            receipt_timeout_secs: default_receipt_timeout_secs(),
        }
    }
}

/// Swap timelocks and defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    #[serde(default = "default_btc_timeout_blocks")]
    pub bitcoin_timeout_blocks: u64,

    #[serde(default = "default_eth_timeout_secs")]
    pub ethereum_timeout_secs: u64,

    /// Average block interval used to compare the two timelocks
    #[serde(default = "default_block_secs")]
    pub bitcoin_block_secs: u64,

    #[serde(default)]
    pub default_mode: SwapMode,
}

fn default_btc_timeout_blocks() -> u64 {
    144
}

fn default_eth_timeout_secs() -> u64 {
    3600
}

fn default_block_secs() -> u64 {
    600
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bitcoin_timeout_blocks: default_btc_timeout_blocks(),
            ethereum_timeout_secs: default_eth_timeout_secs(),
            bitcoin_block_secs: default_block_secs(),
            default_mode: SwapMode::Simple,
        }
    }
}

impl CoordinatorConfig {
    /// Bitcoin timelock expressed in seconds
    pub fn bitcoin_timeout_secs(&self) -> u64 {
        self.bitcoin_timeout_blocks
            .saturating_mul(self.bitcoin_block_secs)
    }

    /// The Bitcoin leg must outlive the Ethereum leg, otherwise the party
    /// claiming second can be refunded out from under.
    pub fn validate(&self) -> Result<(), Error> {
        if self.bitcoin_timeout_blocks == 0 || self.ethereum_timeout_secs == 0 {
            return Err(Error::Config("timeouts must be non-zero".to_string()));
        }
        if self.bitcoin_block_secs == 0 {
            return Err(Error::Config("bitcoin_block_secs must be non-zero".to_string()));
        }
        if self.bitcoin_timeout_secs() <= self.ethereum_timeout_secs {
            return Err(Error::Config(format!(
                "bitcoin timeout ({} blocks = {}s) must exceed ethereum timeout ({}s)",
                self.bitcoin_timeout_blocks,
                self.bitcoin_timeout_secs(),
                self.ethereum_timeout_secs
            )));
        }
        Ok(())
    }
}

/// Relayer polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    #[serde(default = "default_poll_secs")]
    pub poll_interval_secs: u64,

    /// Monitoring stops with TIMEOUT after this long
    #[serde(default = "default_max_monitor_secs")]
    pub max_monitor_secs: u64,

    #[serde(default = "default_confirmations")]
    pub required_confirmations: u32,

    /// Finished watches are forgotten this long after their last update
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_max_monitor_secs() -> u64 {
    600
}

fn default_retention_secs() -> u64 {
    3_600
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_secs(),
            max_monitor_secs: default_max_monitor_secs(),
            required_confirmations: default_confirmations(),
            retention_secs: default_retention_secs(),
        }
    }
}

/// Swap-record storage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String {
    "reports".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// Which chain adapters the binary wires up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Rpc,
    Simulated,
}

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub bitcoin: BitcoinConfig,

    #[serde(default)]
    pub ethereum: EthereumConfig,

    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    #[serde(default)]
    pub relayer: RelayerConfig,

    #[serde(default)]
    pub store: StoreConfig,

    /// API server port
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub backend: Backend,
}

fn default_api_port() -> u16 {
    3002
}

impl AppConfig {
    /// Read a JSON config file. A missing path yields defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    Error::Config(format!("cannot read {}: {}", path.display(), e))
                })?;
                serde_json::from_str(&raw).map_err(|e| Error::Serialization(e.to_string()))?
            }
            None => AppConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.coordinator.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (injected for tests).
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |target: &mut String, key: &str| {
            if let Some(v) = lookup(key) {
                *target = v;
            }
        };
        set(&mut self.bitcoin.rpc_url, "BITCOIN_RPC_URL");
        set(&mut self.bitcoin.rpc_user, "BITCOIN_RPC_USER");
        set(&mut self.bitcoin.rpc_password, "BITCOIN_RPC_PASSWORD");
        set(&mut self.bitcoin.wallet, "BITCOIN_WALLET");
        set(&mut self.bitcoin.htlc_api_url, "BITCOIN_API_URL");
        set(&mut self.bitcoin.htlc_api_key, "API_KEY");
        set(&mut self.ethereum.rpc_url, "ETHEREUM_RPC_URL");
        set(&mut self.ethereum.factory_address, "FACTORY_ADDRESS");
        set(&mut self.store.data_dir, "PORTAL_DATA_DIR");

        if let Some(port) = lookup("PORTAL_API_PORT") {
            self.api_port = port
                .parse()
                .map_err(|_| Error::Config(format!("invalid PORTAL_API_PORT '{}'", port)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.bitcoin.rpc_url, "http://localhost:18443");
        assert_eq!(config.bitcoin.wallet, "test_wallet");
        assert_eq!(config.bitcoin.fee_sats, 1000);
        assert_eq!(config.ethereum.rpc_url, "http://localhost:8545");
        assert_eq!(config.coordinator.bitcoin_timeout_blocks, 144);
        assert_eq!(config.coordinator.ethereum_timeout_secs, 3600);
        assert_eq!(config.relayer.max_monitor_secs, 600);
        assert_eq!(config.relayer.retention_secs, 3_600);
        assert_eq!(config.api_port, 3002);
        assert_eq!(config.backend, Backend::Rpc);
        assert!(config.coordinator.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig =
            serde_json::from_str(r#"{"api_port": 4000, "backend": "simulated"}"#).unwrap();
        assert_eq!(config.api_port, 4000);
        assert_eq!(config.backend, Backend::Simulated);
        assert_eq!(config.store.data_dir, "reports");
    }

    #[test]
    fn test_timelock_ordering_rejected() {
        let config = CoordinatorConfig {
            bitcoin_timeout_blocks: 6,
            ethereum_timeout_secs: 3600,
            bitcoin_block_secs: 600,
            default_mode: SwapMode::Simple,
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let equal = CoordinatorConfig {
            bitcoin_timeout_blocks: 6,
            ethereum_timeout_secs: 6 * 600,
            ..config.clone()
        };
        assert!(equal.validate().is_err());

        let zero = CoordinatorConfig {
            ethereum_timeout_secs: 0,
            ..CoordinatorConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("BITCOIN_RPC_URL", "http://btc:18443"),
            ("API_KEY", "secret-key"),
            ("PORTAL_API_PORT", "8080"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.bitcoin.rpc_url, "http://btc:18443");
        assert_eq!(config.bitcoin.htlc_api_key, "secret-key");
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.ethereum.rpc_url, "http://localhost:8545");
    }

    #[test]
    fn test_bad_port_env() {
        let mut config = AppConfig::default();
        let result = config.apply_env(|k| (k == "PORTAL_API_PORT").then(|| "nope".to_string()));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
