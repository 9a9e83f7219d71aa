use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::{types::ChainId, Error};

/// Signing family of a destination chain; selects the keyring implementation.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
    Native,
    Evm,
    Ton,
}

impl std::fmt::Display for ChainFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainFamily::Native => write!(f, "native"),
            ChainFamily::Evm => write!(f, "evm"),
            ChainFamily::Ton => write!(f, "ton"),
        }
    }
}

impl std::str::FromStr for ChainFamily {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "native" => Ok(ChainFamily::Native),
            "evm" => Ok(ChainFamily::Evm),
            "ton" => Ok(ChainFamily::Ton),
            other => Err(Error::Config(format!("Unknown chain family: {}", other))),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PeerConfig {
    pub name: String,
    pub endpoint: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct NodeConfig {
    /// Position of this node in `peers`.
    pub index: usize,
    pub peers: Vec<PeerConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct KeyringConfig {
    /// Hex-encoded secret key of this node for the chain.
    pub secret_key: String,
    /// Hex public key (or EVM address) of every peer, in peer order.
    pub peer_public_keys: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ChainConfig {
    pub chain_id: ChainId,
    pub name: String,
    pub family: ChainFamily,
    pub rpc_url: String,
    pub contract_address: String,
    pub keyring: KeyringConfig,
}

fn default_request_end_timeout_window_ms() -> u64 {
    60_000
}

fn default_result_check_interval_ms() -> u64 {
    5_000
}

fn default_retry_initial_interval_ms() -> u64 {
    500
}

fn default_retry_max_interval_ms() -> u64 {
    10_000
}

fn default_retry_max_elapsed_ms() -> u64 {
    60_000
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelayerConfig {
    pub signature_threshold: usize,
    #[serde(default = "default_request_end_timeout_window_ms")]
    pub request_end_timeout_window_ms: u64,
    #[serde(default = "default_result_check_interval_ms")]
    pub result_check_interval_ms: u64,
    #[serde(default = "default_retry_initial_interval_ms")]
    pub retry_initial_interval_ms: u64,
    #[serde(default = "default_retry_max_interval_ms")]
    pub retry_max_interval_ms: u64,
    #[serde(default = "default_retry_max_elapsed_ms")]
    pub retry_max_elapsed_ms: u64,
}

impl RelayerConfig {
    pub fn new(signature_threshold: usize) -> Self {
        Self {
            signature_threshold,
            request_end_timeout_window_ms: default_request_end_timeout_window_ms(),
            result_check_interval_ms: default_result_check_interval_ms(),
            retry_initial_interval_ms: default_retry_initial_interval_ms(),
            retry_max_interval_ms: default_retry_max_interval_ms(),
            retry_max_elapsed_ms: default_retry_max_elapsed_ms(),
        }
    }

    pub fn result_check_interval(&self) -> Duration {
        Duration::from_millis(self.result_check_interval_ms)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub node: NodeConfig,
    pub chains: Vec<ChainConfig>,
    pub relayer: RelayerConfig,
}

impl Config {
    /// Loads a JSON config, or TOML when the file ends in `.toml`.
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self, Error> {
        let path = config_path.as_ref();
        let config_str = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;

        let is_toml = path.extension().map(|ext| ext == "toml").unwrap_or(false);
        let config: Config = if is_toml {
            toml::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?
        } else {
            serde_json::from_str(&config_str)
                .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?
        };

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        let peer_count = self.node.peers.len();
        if peer_count == 0 {
            return Err(Error::Config("At least one peer must be configured".to_string()));
        }
        if self.node.index >= peer_count {
            return Err(Error::Config(format!(
                "Node index {} out of range for {} peers",
                self.node.index, peer_count
            )));
        }

        for chain in &self.chains {
            if hex::decode(strip_hex_prefix(&chain.keyring.secret_key)).is_err() {
                return Err(Error::Config(format!("Invalid secret key for chain {}", chain.chain_id)));
            }
            if chain.keyring.peer_public_keys.len() != peer_count {
                return Err(Error::Config(format!(
                    "Chain {} lists {} peer keys, expected {}",
                    chain.chain_id,
                    chain.keyring.peer_public_keys.len(),
                    peer_count
                )));
            }
            for key in &chain.keyring.peer_public_keys {
                if hex::decode(strip_hex_prefix(key)).is_err() {
                    return Err(Error::Config(format!("Invalid public key: {}", key)));
                }
            }
        }

        let relayer = &self.relayer;
        if relayer.signature_threshold == 0 || relayer.signature_threshold > peer_count {
            return Err(Error::Config(format!(
                "Signature threshold must be between 1 and {}",
                peer_count
            )));
        }
        if relayer.request_end_timeout_window_ms == 0 {
            return Err(Error::Config("Request end timeout window must be greater than 0".to_string()));
        }
        if relayer.result_check_interval_ms == 0 {
            return Err(Error::Config("Result check interval must be greater than 0".to_string()));
        }

        Ok(())
    }

    pub fn peer_count(&self) -> usize {
        self.node.peers.len()
    }

    pub fn get_chain_config(&self, chain_id: ChainId) -> Option<&ChainConfig> {
        self.chains.iter().find(|c| c.chain_id == chain_id)
    }
}

pub(crate) fn strip_hex_prefix(value: &str) -> &str {
    value.strip_prefix("0x").unwrap_or(value)
}
