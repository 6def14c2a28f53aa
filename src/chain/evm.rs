//! EVM ledger connector with multi-RPC support and automatic failover

use super::connector::{
    CompleteTransferCall, LedgerConnector, OnChainBridgeStats, OnChainTransferRecord,
    RelayReceipt,
};
use super::nonce::NonceTracker;
use crate::config::{ChainConfig, GasPriceStrategy, RelayerConfig};
use crate::contracts::{BridgeContract, ALREADY_PROCESSED_ERROR};
use crate::error::{RelayerError, RelayerResult};
use crate::events::ChainEvent;
use crate::retry::Backoff;
use crate::transfer::{fmt_message_id, MessageId};

use async_trait::async_trait;
use ethers::contract::ContractError;
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, U256};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Ledger connector for one EVM chain
pub struct EvmConnector {
    config: ChainConfig,
    bridge_address: Address,
    /// HTTP providers (multiple for failover)
    providers: Vec<Provider<Http>>,
    /// Current active provider index
    current_provider: AtomicUsize,
    nonces: NonceTracker,
    degraded: AtomicBool,
    rpc_timeout: Duration,
    confirmation_timeout: Duration,
    poll_interval: Duration,
    log_batch_size: u64,
    reconnect: Backoff,
}

impl EvmConnector {
    /// Create a connector. Fails if the bridge address is unusable or no RPC URL parses.
    pub fn new(config: ChainConfig, relayer: &RelayerConfig) -> RelayerResult<Self> {
        let bridge_address = config
            .bridge_address()
            .ok_or_else(|| {
                RelayerError::Config(format!("Chain {} has no bridge address", config.chain_id))
            })?
            .parse::<Address>()
            .map_err(|e| {
                RelayerError::Config(format!(
                    "Invalid bridge address for chain {}: {}",
                    config.chain_id, e
                ))
            })?;

        let mut providers = Vec::new();
        // unset `${VAR}` substitutions leave blank entries
        for url in config.rpc_urls.iter().map(|u| u.trim()).filter(|u| !u.is_empty()) {
            match Provider::<Http>::try_from(url) {
                Ok(provider) => {
                    providers.push(provider.interval(Duration::from_millis(500)));
                    debug!(chain_id = config.chain_id, url = %url, "Added HTTP provider");
                }
                Err(e) => {
                    warn!(chain_id = config.chain_id, url = %url, "Failed to create provider: {}", e);
                }
            }
        }

        if providers.is_empty() {
            return Err(RelayerError::Connectivity {
                chain_id: config.chain_id,
                message: "No valid RPC providers".to_string(),
            });
        }

        Ok(Self {
            nonces: NonceTracker::new(config.chain_id),
            poll_interval: config.poll_interval(relayer),
            bridge_address,
            providers,
            current_provider: AtomicUsize::new(0),
            degraded: AtomicBool::new(false),
            rpc_timeout: relayer.rpc_timeout(),
            confirmation_timeout: relayer.confirmation_timeout(),
            log_batch_size: relayer.log_batch_size.max(1),
            reconnect: Backoff::reconnect(relayer),
            config,
        })
    }

    /// Get the active HTTP provider
    fn http(&self) -> &Provider<Http> {
        let idx = self.current_provider.load(Ordering::Relaxed);
        &self.providers[idx % self.providers.len()]
    }

    /// Switch to next available provider
    fn failover(&self) {
        if self.providers.len() < 2 {
            return;
        }
        let next = (self.current_provider.load(Ordering::Relaxed) + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);
        warn!(chain_id = self.config.chain_id, provider = next, "RPC failover");
    }

    /// Run a read against each provider in turn, each bounded by the RPC timeout
    async fn with_failover<T, F, Fut>(&self, operation: &str, call: F) -> RelayerResult<T>
    where
        F: Fn(Provider<Http>) -> Fut,
        Fut: Future<Output = Result<T, String>>,
    {
        let mut last_error = String::from("no providers");

        for _ in 0..self.providers.len() {
            match timeout(self.rpc_timeout, call(self.http().clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(chain_id = self.config.chain_id, "{} failed: {}", operation, e);
                    last_error = e;
                }
                Err(_) => {
                    warn!(chain_id = self.config.chain_id, "{} timed out", operation);
                    last_error = format!("timed out after {:?}", self.rpc_timeout);
                }
            }
            self.failover();
        }

        Err(RelayerError::Connectivity {
            chain_id: self.config.chain_id,
            message: format!("{}: {}", operation, last_error),
        })
    }

    async fn fetch_nonce(&self, address: Address) -> RelayerResult<u64> {
        self.with_failover("eth_getTransactionCount", |p| async move {
            p.get_transaction_count(address, None)
                .await
                .map(|n| n.as_u64())
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| RelayerError::Nonce {
            chain_id: self.config.chain_id,
            message: e.to_string(),
        })
    }

    async fn resync_nonce(&self, address: Address) {
        match self.fetch_nonce(address).await {
            Ok(nonce) => self.nonces.sync(nonce).await,
            Err(e) => warn!(chain_id = self.config.chain_id, "Nonce resync failed: {}", e),
        }
    }

    /// Scan the next block range starting at `from`. Returns the last block scanned.
    async fn poll_range(
        &self,
        from: u64,
        sink: &mpsc::Sender<ChainEvent>,
    ) -> RelayerResult<Option<u64>> {
        let head = self.current_height().await?;
        if head < from {
            return Ok(None);
        }
        let to = head.min(from + self.log_batch_size - 1);
        let address = self.bridge_address;

        debug!(chain_id = self.config.chain_id, from, to, "Scanning bridge logs");

        let logs = self
            .with_failover("eth_getLogs", |p| async move {
                let contract = BridgeContract::new(address, Arc::new(p));
                contract
                    .events()
                    .from_block(from)
                    .to_block(to)
                    .query_with_meta()
                    .await
                    .map_err(|e| e.to_string())
            })
            .await?;

        for (raw, meta) in logs {
            let event = match ChainEvent::from_log(self.config.chain_id, raw, &meta) {
                Ok(event) => event,
                Err(e) => {
                    warn!(
                        chain_id = self.config.chain_id,
                        tx_hash = ?meta.transaction_hash,
                        "Skipping bridge log: {}", e
                    );
                    continue;
                }
            };
            deliver(sink, event).await?;
        }

        deliver(
            sink,
            ChainEvent::Checkpoint {
                chain_id: self.config.chain_id,
                block_number: to,
            },
        )
        .await?;

        Ok(Some(to))
    }

    fn classify_send_error<M: Middleware>(&self, error: &ContractError<M>) -> RelayerError {
        let chain_id = self.config.chain_id;

        if let Some(reason) = revert_reason(error) {
            return RelayerError::OnChainRevert { chain_id, reason };
        }

        let message = error.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("nonce too low") || lowered.contains("nonce has already been used") {
            return RelayerError::Nonce { chain_id, message };
        }
        if let Some(idx) = lowered.find("execution reverted") {
            return RelayerError::OnChainRevert {
                chain_id,
                reason: lowered[idx..].to_string(),
            };
        }

        RelayerError::Connectivity { chain_id, message }
    }
}

async fn deliver(sink: &mpsc::Sender<ChainEvent>, event: ChainEvent) -> RelayerResult<()> {
    sink.send(event)
        .await
        .map_err(|_| RelayerError::Internal("event channel closed".to_string()))
}

/// Decode a revert payload: `Error(string)` or the known custom errors
fn revert_reason<M: Middleware>(error: &ContractError<M>) -> Option<String> {
    if let Some(reason) = error.decode_revert::<String>() {
        return Some(reason);
    }

    let data = error.as_revert()?;
    if data.len() >= 4 && data[..4] == ethers::utils::id(ALREADY_PROCESSED_ERROR) {
        return Some("MessageAlreadyProcessed".to_string());
    }
    Some(format!("0x{}", hex::encode(data)))
}

#[async_trait]
impl LedgerConnector for EvmConnector {
    fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    async fn current_height(&self) -> RelayerResult<u64> {
        let height = self
            .with_failover("eth_blockNumber", |p| async move {
                p.get_block_number()
                    .await
                    .map(|b| b.as_u64())
                    .map_err(|e| e.to_string())
            })
            .await?;

        crate::metrics::record_block_height(self.config.chain_id, height);
        Ok(height)
    }

    async fn transfer_record(
        &self,
        message_id: MessageId,
    ) -> RelayerResult<Option<OnChainTransferRecord>> {
        let address = self.bridge_address;
        let (sender, recipient, amount, source, destination, timestamp, processed, cancelled) =
            self.with_failover("getTransferRecord", |p| async move {
                BridgeContract::new(address, Arc::new(p))
                    .get_transfer_record(message_id.0)
                    .call()
                    .await
                    .map_err(|e| e.to_string())
            })
            .await?;

        if sender.is_zero() {
            return Ok(None);
        }

        Ok(Some(OnChainTransferRecord {
            sender,
            recipient,
            amount,
            source_chain_id: source,
            destination_chain_id: destination,
            timestamp,
            processed,
            cancelled,
        }))
    }

    async fn is_processed(&self, message_id: MessageId) -> RelayerResult<bool> {
        let address = self.bridge_address;
        self.with_failover("isProcessed", |p| async move {
            BridgeContract::new(address, Arc::new(p))
                .is_processed(message_id.0)
                .call()
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    async fn remaining_daily_limit(&self) -> RelayerResult<U256> {
        let address = self.bridge_address;
        self.with_failover("getRemainingDailyLimit", |p| async move {
            BridgeContract::new(address, Arc::new(p))
                .get_remaining_daily_limit()
                .call()
                .await
                .map_err(|e| e.to_string())
        })
        .await
    }

    async fn bridge_stats(&self) -> RelayerResult<OnChainBridgeStats> {
        let address = self.bridge_address;
        let (total_locked, today_bridged, remaining_limit, current_nonce) = self
            .with_failover("getBridgeStats", |p| async move {
                BridgeContract::new(address, Arc::new(p))
                    .get_bridge_stats()
                    .call()
                    .await
                    .map_err(|e| e.to_string())
            })
            .await?;

        Ok(OnChainBridgeStats {
            total_locked,
            today_bridged,
            remaining_limit,
            current_nonce,
        })
    }

    async fn send(
        &self,
        call: CompleteTransferCall,
        wallet: &LocalWallet,
    ) -> RelayerResult<RelayReceipt> {
        let chain_id = self.config.chain_id;
        let wallet = wallet.clone().with_chain_id(chain_id);
        let from = wallet.address();

        if !self.nonces.is_initialized().await {
            let nonce = self.fetch_nonce(from).await?;
            self.nonces.init(nonce).await;
        }
        let nonce = self.nonces.allocate().await?;

        let client = Arc::new(SignerMiddleware::new(self.http().clone(), wallet));
        let contract = BridgeContract::new(self.bridge_address, client);
        let mut tx = contract
            .complete_transfer(
                call.message_id.0,
                call.recipient,
                call.amount,
                U256::from(call.source_chain_id),
                call.signature,
            )
            .nonce(nonce);
        if self.config.gas_price_strategy == GasPriceStrategy::Legacy {
            tx = tx.legacy();
        }

        let pending = match timeout(self.rpc_timeout, tx.send()).await {
            Ok(Ok(pending)) => pending,
            Ok(Err(e)) => {
                let err = self.classify_send_error(&e);
                if matches!(err, RelayerError::Nonce { .. }) {
                    self.resync_nonce(from).await;
                } else {
                    self.nonces.release(nonce).await;
                    if matches!(err, RelayerError::Connectivity { .. }) {
                        self.failover();
                    }
                }
                return Err(err);
            }
            Err(_) => {
                // broadcast may or may not have landed
                self.resync_nonce(from).await;
                return Err(RelayerError::Timeout {
                    operation: format!("completeTransfer broadcast on chain {}", chain_id),
                });
            }
        };

        let tx_hash = pending.tx_hash();
        info!(
            chain_id,
            message_id = %fmt_message_id(&call.message_id),
            tx_hash = ?tx_hash,
            nonce,
            "Completion transaction sent"
        );

        let receipt = match timeout(self.confirmation_timeout, pending).await {
            Ok(Ok(Some(receipt))) => receipt,
            Ok(Ok(None)) => {
                self.resync_nonce(from).await;
                return Err(RelayerError::Connectivity {
                    chain_id,
                    message: format!("transaction {:?} dropped from mempool", tx_hash),
                });
            }
            Ok(Err(e)) => {
                return Err(RelayerError::Connectivity {
                    chain_id,
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(RelayerError::Timeout {
                    operation: format!("receipt for {:?}", tx_hash),
                });
            }
        };

        self.nonces.confirm(nonce).await;

        if receipt.status == Some(0u64.into()) {
            return Err(RelayerError::OnChainRevert {
                chain_id,
                reason: format!("transaction {:?} reverted", tx_hash),
            });
        }

        Ok(RelayReceipt {
            tx_hash,
            block_number: receipt.block_number.map(|b| b.as_u64()),
        })
    }

    async fn subscribe(
        &self,
        from_block: Option<u64>,
        sink: mpsc::Sender<ChainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RelayerResult<()> {
        let chain_id = self.config.chain_id;
        let mut next_block = match from_block {
            Some(block) => block,
            None => self.current_height().await?,
        };
        let mut failures: u32 = 0;

        info!(chain_id, from_block = next_block, "Subscribed to bridge events");

        loop {
            if *shutdown.borrow() || sink.is_closed() {
                info!(chain_id, "Bridge event subscription stopped");
                return Ok(());
            }

            let mut caught_up = true;
            match self.poll_range(next_block, &sink).await {
                Ok(Some(scanned_to)) => {
                    next_block = scanned_to + 1;
                    caught_up = self.current_height().await.map_or(true, |h| h < next_block);
                    failures = 0;
                    if self.degraded.swap(false, Ordering::Relaxed) {
                        crate::metrics::record_chain_degraded(chain_id, false);
                    }
                    crate::metrics::record_chain_health(chain_id, true);
                }
                Ok(None) => {
                    failures = 0;
                }
                Err(_) if sink.is_closed() => continue,
                Err(e) => {
                    failures += 1;
                    crate::metrics::record_chain_health(chain_id, false);

                    if !self.reconnect.should_retry(failures) {
                        self.degraded.store(true, Ordering::Relaxed);
                        crate::metrics::record_chain_degraded(chain_id, true);
                        error!(chain_id, attempts = failures, "Chain degraded: {}", e);
                        return Err(RelayerError::ChainDegraded {
                            chain_id,
                            attempts: failures,
                        });
                    }

                    let delay = self.reconnect.delay_for_attempt(failures - 1);
                    warn!(
                        chain_id,
                        attempt = failures,
                        "Event polling failed, retrying in {:?}: {}", delay, e
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => {}
                    }
                    continue;
                }
            }

            if caught_up {
                tokio::select! {
                    _ = tokio::time::sleep(self.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_already_processed_reason;

    fn chain(bridge: Option<&str>, rpc: &[&str]) -> ChainConfig {
        ChainConfig {
            chain_id: 80002,
            name: "Polygon Amoy".to_string(),
            rpc_urls: rpc.iter().map(|s| s.to_string()).collect(),
            bridge_address: bridge.map(str::to_string),
            confirmations: None,
            native_currency: "MATIC".to_string(),
            explorer_url: None,
            is_testnet: true,
            poll_interval_ms: None,
            start_block: None,
            gas_price_strategy: GasPriceStrategy::Eip1559,
            enabled: true,
        }
    }

    #[test]
    fn test_new_requires_bridge_address() {
        let result = EvmConnector::new(chain(None, &["http://localhost:8545"]), &RelayerConfig::default());
        assert!(matches!(result, Err(RelayerError::Config(_))));

        let result = EvmConnector::new(
            chain(Some("not-an-address"), &["http://localhost:8545"]),
            &RelayerConfig::default(),
        );
        assert!(matches!(result, Err(RelayerError::Config(_))));
    }

    #[test]
    fn test_new_requires_a_valid_rpc_url() {
        let result = EvmConnector::new(
            chain(Some("0x00000000000000000000000000000000000000aa"), &["not a url"]),
            &RelayerConfig::default(),
        );
        assert!(matches!(result, Err(RelayerError::Connectivity { .. })));
    }

    #[tokio::test]
    async fn test_unreachable_rpc_marks_chain_degraded() {
        let relayer = RelayerConfig {
            max_reconnect_attempts: 2,
            retry_initial_backoff_ms: 1,
            retry_max_backoff_ms: 2,
            rpc_timeout_secs: 2,
            ..Default::default()
        };
        let connector = EvmConnector::new(
            chain(Some("0x00000000000000000000000000000000000000aa"), &["http://127.0.0.1:1"]),
            &relayer,
        )
        .unwrap();

        let (sink, _events) = mpsc::channel(8);
        let (_shutdown_tx, shutdown) = watch::channel(false);
        let result = connector.subscribe(Some(0), sink, shutdown).await;

        assert!(matches!(
            result,
            Err(RelayerError::ChainDegraded { chain_id: 80002, attempts: 2 })
        ));
        assert!(connector.is_degraded());
    }

    #[test]
    fn test_failover_rotates_providers() {
        let connector = EvmConnector::new(
            chain(
                Some("0x00000000000000000000000000000000000000aa"),
                &["http://localhost:8545", "http://localhost:8546"],
            ),
            &RelayerConfig::default(),
        )
        .unwrap();

        assert_eq!(connector.chain_id(), 80002);
        assert!(!connector.is_degraded());
        connector.failover();
        assert_eq!(connector.current_provider.load(Ordering::Relaxed), 1);
        connector.failover();
        assert_eq!(connector.current_provider.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_already_processed_selector() {
        let selector = ethers::utils::id(ALREADY_PROCESSED_ERROR);
        assert_eq!(selector.len(), 4);
        assert!(is_already_processed_reason("MessageAlreadyProcessed"));
    }
}
