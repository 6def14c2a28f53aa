//! Configuration management for the bridge relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::chain::finality::recommended_confirmations;

/// Env var pointing at the configuration file
pub const CONFIG_PATH_ENV: &str = "BRIDGE_RELAYER_CONFIG";

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub relayer: RelayerConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub chains: HashMap<String, ChainConfig>,
    #[serde(default)]
    pub wallet: WalletConfig,
    #[serde(default)]
    pub fees: FeeConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayerConfig {
    pub instance_id: String,
    /// Default finality poll interval, overridable per chain
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_channel_capacity")]
    pub event_channel_capacity: usize,
    #[serde(default = "default_channel_capacity")]
    pub relay_queue_capacity: usize,
    /// Relay submission attempts before a transfer is marked failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_initial_ms")]
    pub retry_initial_backoff_ms: u64,
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_backoff_ms: u64,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_log_batch_size")]
    pub log_batch_size: u64,
    /// Promote finalized transfers to relaying without operator action
    #[serde(default = "default_true")]
    pub auto_relay: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub name: String,
    pub rpc_urls: Vec<String>,
    /// Bridge contract; chains without one are disabled at startup
    #[serde(default)]
    pub bridge_address: Option<String>,
    /// Required confirmations; defaults per known chain
    #[serde(default)]
    pub confirmations: Option<u64>,
    #[serde(default = "default_native_currency")]
    pub native_currency: String,
    #[serde(default)]
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub is_testnet: bool,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    #[serde(default)]
    pub start_block: Option<u64>,
    #[serde(default)]
    pub gas_price_strategy: GasPriceStrategy,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GasPriceStrategy {
    Legacy,
    #[default]
    Eip1559,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WalletConfig {
    /// Name of the env var holding the relayer private key
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeeConfig {
    #[serde(default = "default_base_fee_wei")]
    pub base_fee_wei: String,
    #[serde(default = "default_gas_estimate_wei")]
    pub gas_estimate_wei: String,
}

impl Default for FeeConfig {
    fn default() -> Self {
        Self {
            base_fee_wei: default_base_fee_wei(),
            gas_estimate_wei: default_gas_estimate_wei(),
        }
    }
}

impl FeeConfig {
    pub fn base_fee(&self) -> Result<U256> {
        U256::from_dec_str(&self.base_fee_wei)
            .with_context(|| format!("Invalid base_fee_wei: {}", self.base_fee_wei))
    }

    pub fn gas_estimate(&self) -> Result<U256> {
        U256::from_dec_str(&self.gas_estimate_wei)
            .with_context(|| format!("Invalid gas_estimate_wei: {}", self.gas_estimate_wei))
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_channel_capacity() -> usize {
    1_024
}
fn default_max_retries() -> u32 {
    5
}
fn default_retry_initial_ms() -> u64 {
    2_000
}
fn default_retry_max_ms() -> u64 {
    60_000
}
fn default_max_reconnect_attempts() -> u32 {
    10
}
fn default_rpc_timeout_secs() -> u64 {
    30
}
fn default_confirmation_timeout_secs() -> u64 {
    120
}
fn default_shutdown_grace_secs() -> u64 {
    30
}
fn default_health_check_interval_secs() -> u64 {
    30
}
fn default_log_batch_size() -> u64 {
    1_000
}
fn default_true() -> bool {
    true
}
fn default_native_currency() -> String {
    "ETH".to_string()
}
// 0.001 native units
fn default_base_fee_wei() -> String {
    "1000000000000000".to_string()
}
// 0.0005 native units
fn default_gas_estimate_wei() -> String {
    "500000000000000".to_string()
}

impl RelayerConfig {
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs(self.rpc_timeout_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            instance_id: "bridge-relayer".to_string(),
            poll_interval_ms: default_poll_interval_ms(),
            event_channel_capacity: default_channel_capacity(),
            relay_queue_capacity: default_channel_capacity(),
            max_retries: default_max_retries(),
            retry_initial_backoff_ms: default_retry_initial_ms(),
            retry_max_backoff_ms: default_retry_max_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
            health_check_interval_secs: default_health_check_interval_secs(),
            log_batch_size: default_log_batch_size(),
            auto_relay: true,
        }
    }
}

impl ChainConfig {
    /// Confirmations required before a transfer from this chain is relayed
    pub fn required_confirmations(&self) -> u64 {
        self.confirmations
            .unwrap_or_else(|| recommended_confirmations(self.chain_id))
    }

    /// Finality poll interval, falling back to the relayer-wide default
    pub fn poll_interval(&self, relayer: &RelayerConfig) -> Duration {
        Duration::from_millis(self.poll_interval_ms.unwrap_or(relayer.poll_interval_ms))
    }

    /// Bridge address if one is configured and non-empty
    pub fn bridge_address(&self) -> Option<&str> {
        self.bridge_address
            .as_deref()
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }
}

impl Settings {
    /// Load settings from the file named by `BRIDGE_RELAYER_CONFIG`
    pub fn load() -> Result<Self> {
        let config_path = env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references
    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config_str = substitute_env_vars(config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.enabled_chains().is_empty() {
            anyhow::bail!("At least one chain must be enabled");
        }

        let mut seen = HashSet::new();
        for (name, chain) in &self.chains {
            if !chain.enabled {
                continue;
            }
            if chain.rpc_urls.is_empty() {
                anyhow::bail!("Chain {} has no RPC URLs configured", name);
            }
            if !seen.insert(chain.chain_id) {
                anyhow::bail!("Chain id {} is configured more than once", chain.chain_id);
            }
            if chain.bridge_address().is_none() {
                tracing::warn!("Chain {} has no bridge address - it will be disabled", name);
            }
        }

        self.fees.base_fee()?;
        self.fees.gas_estimate()?;

        Ok(())
    }

    /// Get list of enabled chains
    pub fn enabled_chains(&self) -> Vec<(&String, &ChainConfig)> {
        self.chains.iter().filter(|(_, c)| c.enabled).collect()
    }

    /// Get chain config by chain ID
    pub fn get_chain_by_id(&self, chain_id: u64) -> Option<&ChainConfig> {
        self.chains.values().find(|c| c.chain_id == chain_id)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("valid env var pattern");
    }

    ENV_VAR
        .replace_all(input, |cap: &regex::Captures| {
            env::var(&cap[1]).unwrap_or_default()
        })
        .into_owned()
}
