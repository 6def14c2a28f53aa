//! Chain module - supported chains and their connections
//!
//! This module provides:
//! - The chain registry built from configuration at startup
//! - The `LedgerConnector` seam and its EVM implementation
//! - Per-chain nonce tracking for the relayer account
//! - Per-chain finality monitoring

pub mod connector;
pub mod evm;
pub mod finality;
pub mod nonce;

pub use connector::{LedgerConnector, OnChainBridgeStats, OnChainTransferRecord};
pub use evm::EvmConnector;
pub use finality::FinalityMonitor;

use crate::config::{ChainConfig, Settings};
use crate::error::{RelayerError, RelayerResult};

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A configured chain and its connector
#[derive(Clone)]
pub struct ChainEntry {
    pub config: ChainConfig,
    pub connector: Arc<dyn LedgerConnector>,
}

/// Static table of the chains the relayer serves. Immutable after startup.
#[derive(Clone, Default)]
pub struct ChainRegistry {
    chains: BTreeMap<u64, ChainEntry>,
}

impl ChainRegistry {
    pub fn new(entries: Vec<(ChainConfig, Arc<dyn LedgerConnector>)>) -> Self {
        let chains = entries
            .into_iter()
            .map(|(config, connector)| (config.chain_id, ChainEntry { config, connector }))
            .collect();
        Self { chains }
    }

    /// Build EVM connectors for every enabled chain. A chain whose bridge
    /// address or RPC endpoints are unusable is disabled, not fatal.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut entries: Vec<(ChainConfig, Arc<dyn LedgerConnector>)> = Vec::new();

        for (name, chain_config) in settings.enabled_chains() {
            match EvmConnector::new(chain_config.clone(), &settings.relayer) {
                Ok(connector) => {
                    let connector: Arc<dyn LedgerConnector> = Arc::new(connector);
                    info!(
                        chain_id = chain_config.chain_id,
                        confirmations = chain_config.required_confirmations(),
                        "Chain {} initialized",
                        chain_config.name
                    );
                    entries.push((chain_config.clone(), connector));
                }
                Err(e) => {
                    warn!(chain_id = chain_config.chain_id, "Chain {} disabled: {}", name, e);
                }
            }
        }

        Self::new(entries)
    }

    pub fn get(&self, chain_id: u64) -> RelayerResult<&ChainEntry> {
        self.chains
            .get(&chain_id)
            .ok_or(RelayerError::ChainNotConfigured { chain_id })
    }

    pub fn connector(&self, chain_id: u64) -> RelayerResult<Arc<dyn LedgerConnector>> {
        self.get(chain_id).map(|entry| entry.connector.clone())
    }

    pub fn config(&self, chain_id: u64) -> RelayerResult<&ChainConfig> {
        self.get(chain_id).map(|entry| &entry.config)
    }

    pub fn configs(&self) -> Vec<&ChainConfig> {
        self.chains.values().map(|entry| &entry.config).collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = &ChainEntry> {
        self.chains.values()
    }

    /// Chain ids in ascending order
    pub fn chain_ids(&self) -> Vec<u64> {
        self.chains.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Health check for all chains
    pub async fn health_check(&self) -> Vec<(u64, bool)> {
        let checks = self.chains.values().map(|entry| async move {
            let healthy =
                !entry.connector.is_degraded() && entry.connector.current_height().await.is_ok();
            (entry.config.chain_id, healthy)
        });

        let results = futures::future::join_all(checks).await;
        for (chain_id, healthy) in &results {
            crate::metrics::record_chain_health(*chain_id, *healthy);
        }
        results
    }
}
