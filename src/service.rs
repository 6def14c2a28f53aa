//! Bridge service: wires the relay pipeline together and answers the
//! service-level API
//!
//! Per configured chain the service runs one subscription, one event
//! listener, one finality monitor and one relay executor. All of them share
//! state only through the transfer registry and the processed set.

use crate::chain::{ChainRegistry, FinalityMonitor, OnChainTransferRecord};
use crate::config::{ChainConfig, FeeConfig, RelayerConfig};
use crate::error::{RelayerError, RelayerResult};
use crate::listener::EventListener;
use crate::processed::ProcessedSet;
use crate::registry::TransferRegistry;
use crate::relay::{RelayDispatcher, RelayExecutor};
use crate::retry::Backoff;
use crate::signer::AttestationSigner;
use crate::stats::{serialize_decimal, serialize_decimal_opt, Stats};
use crate::store::TransferFilter;
use crate::transfer::{fmt_message_id, MessageId, StatusUpdate, Transfer, TransferStatus};

use ethers::types::{Address, U256};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Live view of one chain's bridge contract
#[derive(Debug, Clone, Serialize)]
pub struct ChainStatus {
    pub chain_id: u64,
    pub chain_name: String,
    pub connected: bool,
    pub degraded: bool,
    #[serde(serialize_with = "serialize_decimal_opt")]
    pub total_locked: Option<U256>,
    #[serde(serialize_with = "serialize_decimal_opt")]
    pub today_bridged: Option<U256>,
    #[serde(serialize_with = "serialize_decimal_opt")]
    pub remaining_limit: Option<U256>,
    #[serde(serialize_with = "serialize_decimal_opt")]
    pub current_nonce: Option<U256>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Where a transfer status answer came from
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum TransferDetail {
    Local(Transfer),
    /// Seen completed on its destination, not tracked locally
    Processed,
    OnChain {
        chain_id: u64,
        record: OnChainTransferRecord,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferStatusReport {
    pub message_id: MessageId,
    pub status: String,
    pub detail: TransferDetail,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub stats: Stats,
    pub connected_chains: Vec<u64>,
    pub bridge_chains: Vec<u64>,
    pub relay_enabled: bool,
    pub relayer_address: Option<Address>,
    pub processed_messages: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeeEstimate {
    #[serde(serialize_with = "serialize_decimal")]
    pub amount: U256,
    #[serde(serialize_with = "serialize_decimal")]
    pub base_fee: U256,
    #[serde(serialize_with = "serialize_decimal")]
    pub gas_estimate: U256,
    #[serde(serialize_with = "serialize_decimal")]
    pub total_fee: U256,
    pub currency: String,
}

pub struct BridgeService {
    chains: Arc<ChainRegistry>,
    registry: Arc<TransferRegistry>,
    processed: Arc<ProcessedSet>,
    signer: Option<Arc<AttestationSigner>>,
    config: RelayerConfig,
    fees: FeeConfig,
    dispatcher: Arc<RelayDispatcher>,
    /// Receiving ends of the relay queues until `start` hands them to executors
    queues: Mutex<Option<HashMap<u64, mpsc::Receiver<MessageId>>>>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl BridgeService {
    pub fn new(
        chains: ChainRegistry,
        registry: Arc<TransferRegistry>,
        signer: Option<AttestationSigner>,
        config: RelayerConfig,
        fees: FeeConfig,
    ) -> Self {
        let (dispatcher, queues) = RelayDispatcher::new(chains.chain_ids(), config.relay_queue_capacity);
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            chains: Arc::new(chains),
            registry,
            processed: Arc::new(ProcessedSet::new()),
            signer: signer.map(Arc::new),
            config,
            fees,
            dispatcher: Arc::new(dispatcher),
            queues: Mutex::new(Some(queues)),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the per-chain pipelines and recover transfers left mid-flight
    pub async fn start(&self) -> RelayerResult<()> {
        let mut queues = self
            .queues
            .lock()
            .await
            .take()
            .ok_or_else(|| RelayerError::Internal("bridge service already started".to_string()))?;

        if self.signer.is_none() {
            warn!("Relayer key unavailable - relay disabled, serving status only");
        } else if !self.config.auto_relay {
            info!("Automatic relay disabled - finalized transfers wait for an operator");
        }

        let mut tasks = self.tasks.lock().await;

        for entry in self.chains.entries() {
            let chain_id = entry.config.chain_id;
            let capacity = self.config.event_channel_capacity.max(1);
            let (event_tx, event_rx) = mpsc::channel(capacity);
            let (notify_tx, notify_rx) = mpsc::channel(capacity);

            let from_block = match self.registry.get_checkpoint(chain_id).await? {
                Some(checkpoint) => Some(checkpoint + 1),
                None => entry.config.start_block,
            };

            let connector = entry.connector.clone();
            let shutdown = self.shutdown_tx.subscribe();
            tasks.push(tokio::spawn(async move {
                match connector.subscribe(from_block, event_tx, shutdown).await {
                    Ok(()) => debug!(chain_id, "Subscription ended"),
                    Err(e) => error!(chain_id, "Subscription stopped: {}", e),
                }
            }));

            let listener = EventListener::new(chain_id, self.registry.clone(), self.processed.clone(), notify_tx);
            tasks.push(tokio::spawn(listener.run(event_rx, self.shutdown_tx.subscribe())));

            let monitor = FinalityMonitor::new(
                &entry.config,
                &self.config,
                entry.connector.clone(),
                self.registry.clone(),
                self.dispatcher.clone(),
                self.auto_relay_enabled(),
            );
            tasks.push(tokio::spawn(monitor.run(notify_rx, self.shutdown_tx.subscribe())));

            if let Some(queue) = queues.remove(&chain_id) {
                let executor = RelayExecutor::new(
                    entry.connector.clone(),
                    self.registry.clone(),
                    self.processed.clone(),
                    self.signer.clone(),
                    Backoff::relay(&self.config),
                    self.shutdown_tx.subscribe(),
                );
                tasks.push(tokio::spawn(executor.run(queue)));
            }

            info!(chain_id, from_block = ?from_block, "Chain pipeline started");
        }
        drop(tasks);

        self.recover().await?;
        info!(chains = self.chains.len(), "Bridge service started");
        Ok(())
    }

    /// Move transfers a previous run left behind back into the pipeline
    async fn recover(&self) -> RelayerResult<()> {
        let detected = self
            .registry
            .list(TransferFilter::status(TransferStatus::Detected))
            .await?;
        for transfer in &detected {
            // the finality sweep picks these up
            if let Err(e) = self
                .registry
                .transition(&transfer.message_id, StatusUpdate::to(TransferStatus::AwaitingFinality))
                .await
            {
                warn!(
                    message_id = %fmt_message_id(&transfer.message_id),
                    "Could not resume detected transfer: {}", e
                );
            }
        }

        let relaying = self
            .registry
            .list(TransferFilter::status(TransferStatus::Relaying))
            .await?;
        let requeue: &[Transfer] = if self.signer.is_some() {
            &relaying
        } else {
            // kept RELAYING for a later run that has a key
            if !relaying.is_empty() {
                warn!(
                    relaying = relaying.len(),
                    "Relayer key unavailable - relaying transfers not re-queued"
                );
            }
            &[]
        };
        for transfer in requeue {
            if let Err(e) = self
                .dispatcher
                .enqueue(transfer.destination_chain_id, transfer.message_id)
                .await
            {
                warn!(
                    message_id = %fmt_message_id(&transfer.message_id),
                    "Could not re-queue relaying transfer: {}", e
                );
            }
        }

        if !detected.is_empty() || !relaying.is_empty() {
            info!(
                detected = detected.len(),
                relaying = relaying.len(),
                "Recovered in-flight transfers"
            );
        }
        Ok(())
    }

    /// Signal every loop to stop and wait up to the grace period for them
    pub async fn shutdown(&self) {
        info!("Stopping bridge service");
        let _ = self.shutdown_tx.send(true);

        let handles: Vec<_> = self.tasks.lock().await.drain(..).collect();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        let grace = self.config.shutdown_grace();
        if tokio::time::timeout(grace, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!("Shutdown grace period of {:?} elapsed, aborting remaining tasks", grace);
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Bridge service stopped");
    }

    pub fn chains(&self) -> &ChainRegistry {
        &self.chains
    }

    pub fn registry(&self) -> &TransferRegistry {
        &self.registry
    }

    /// A relayer key is loaded, so relays can be submitted at all
    pub fn relay_enabled(&self) -> bool {
        self.signer.is_some()
    }

    /// Finalized transfers are promoted without operator action
    pub fn auto_relay_enabled(&self) -> bool {
        self.relay_enabled() && self.config.auto_relay
    }

    pub fn chain_config(&self, chain_id: u64) -> RelayerResult<&ChainConfig> {
        self.chains.config(chain_id)
    }

    pub fn chain_configs(&self) -> Vec<&ChainConfig> {
        self.chains.configs()
    }

    pub async fn get_chain_status(&self, chain_id: u64) -> RelayerResult<ChainStatus> {
        let entry = self.chains.get(chain_id)?;
        let degraded = entry.connector.is_degraded();

        let (stats, limit) = tokio::join!(
            entry.connector.bridge_stats(),
            entry.connector.remaining_daily_limit()
        );

        let status = match stats {
            Ok(stats) => ChainStatus {
                chain_id,
                chain_name: entry.config.name.clone(),
                connected: !degraded,
                degraded,
                total_locked: Some(stats.total_locked),
                today_bridged: Some(stats.today_bridged),
                remaining_limit: Some(limit.unwrap_or_else(|e| {
                    debug!(chain_id, "Remaining daily limit unavailable: {}", e);
                    stats.remaining_limit
                })),
                current_nonce: Some(stats.current_nonce),
                error: None,
            },
            Err(e) => {
                debug!(chain_id, "Bridge stats unavailable: {}", e);
                ChainStatus {
                    chain_id,
                    chain_name: entry.config.name.clone(),
                    connected: false,
                    degraded,
                    total_locked: None,
                    today_bridged: None,
                    remaining_limit: None,
                    current_nonce: None,
                    error: Some(e.to_string()),
                }
            }
        };
        Ok(status)
    }

    pub async fn get_all_chains_status(&self) -> Vec<ChainStatus> {
        let lookups = self
            .chains
            .chain_ids()
            .into_iter()
            .map(|chain_id| self.get_chain_status(chain_id));

        futures::future::join_all(lookups)
            .await
            .into_iter()
            .filter_map(Result::ok)
            .collect()
    }

    /// Local registry first, then destination confirmations, then every bridge contract
    pub async fn get_transfer_status(&self, message_id: &MessageId) -> RelayerResult<TransferStatusReport> {
        if let Some(transfer) = self.registry.get(message_id).await? {
            return Ok(TransferStatusReport {
                message_id: *message_id,
                status: transfer.status.to_string(),
                detail: TransferDetail::Local(transfer),
            });
        }

        if self.processed.contains(message_id) {
            return Ok(TransferStatusReport {
                message_id: *message_id,
                status: TransferStatus::Completed.to_string(),
                detail: TransferDetail::Processed,
            });
        }

        for entry in self.chains.entries() {
            match entry.connector.transfer_record(*message_id).await {
                Ok(Some(record)) => {
                    let status = if record.processed {
                        "completed"
                    } else if record.cancelled {
                        "cancelled"
                    } else {
                        "pending"
                    };
                    return Ok(TransferStatusReport {
                        message_id: *message_id,
                        status: status.to_string(),
                        detail: TransferDetail::OnChain {
                            chain_id: entry.config.chain_id,
                            record,
                        },
                    });
                }
                Ok(None) => {}
                Err(e) => debug!(
                    chain_id = entry.config.chain_id,
                    message_id = %fmt_message_id(message_id),
                    "Transfer record lookup failed: {}", e
                ),
            }
        }

        Err(RelayerError::TransferNotFound {
            message_id: fmt_message_id(message_id),
        })
    }

    pub async fn get_stats(&self) -> StatsSnapshot {
        let connected_chains = self
            .chains
            .entries()
            .filter(|entry| !entry.connector.is_degraded())
            .map(|entry| entry.config.chain_id)
            .collect();

        StatsSnapshot {
            stats: self.registry.stats().await,
            connected_chains,
            bridge_chains: self.chains.chain_ids(),
            relay_enabled: self.relay_enabled(),
            relayer_address: self.signer.as_ref().map(|s| s.address()),
            processed_messages: self.processed.len(),
        }
    }

    /// Operator trigger: re-open a failed transfer, or push a final one that
    /// is still awaiting finality, into the relay queue
    pub async fn relay_transfer(&self, message_id: &MessageId) -> RelayerResult<Transfer> {
        if self.signer.is_none() {
            return Err(RelayerError::SignatureUnavailable);
        }

        let transfer = self
            .registry
            .get(message_id)
            .await?
            .ok_or_else(|| RelayerError::TransferNotFound {
                message_id: fmt_message_id(message_id),
            })?;

        let not_eligible = |status: TransferStatus| RelayerError::NotEligible {
            message_id: fmt_message_id(message_id),
            status: status.to_string(),
        };

        match transfer.status {
            TransferStatus::Failed => {}
            TransferStatus::AwaitingFinality => {
                let source = self.chains.get(transfer.source_chain_id)?;
                let height = source.connector.current_height().await?;
                if transfer.confirmations_at(height) < source.config.required_confirmations() {
                    return Err(not_eligible(transfer.status));
                }
            }
            status => return Err(not_eligible(status)),
        }

        if !self.dispatcher.has_queue(transfer.destination_chain_id) {
            return Err(RelayerError::ChainNotConfigured {
                chain_id: transfer.destination_chain_id,
            });
        }

        let updated = self
            .registry
            .transition(message_id, StatusUpdate::to(TransferStatus::Relaying))
            .await
            .map_err(|e| match e {
                RelayerError::InvalidStateTransition { from, .. } => RelayerError::NotEligible {
                    message_id: fmt_message_id(message_id),
                    status: from,
                },
                e => e,
            })?;

        info!(
            message_id = %fmt_message_id(message_id),
            from = %transfer.status,
            "Manual relay requested"
        );
        self.dispatcher
            .enqueue(updated.destination_chain_id, updated.message_id)
            .await?;
        Ok(updated)
    }

    pub async fn cancel_transfer(&self, message_id: &MessageId) -> RelayerResult<Transfer> {
        let cancelled = self
            .registry
            .transition(message_id, StatusUpdate::to(TransferStatus::Cancelled))
            .await?;
        info!(message_id = %fmt_message_id(message_id), "Transfer cancelled");
        Ok(cancelled)
    }

    pub fn estimate_fee(
        &self,
        source_chain_id: u64,
        destination_chain_id: u64,
        amount: U256,
    ) -> RelayerResult<FeeEstimate> {
        self.chains.config(destination_chain_id)?;

        let currency = self
            .chains
            .config(source_chain_id)
            .map(|c| c.native_currency.clone())
            .unwrap_or_else(|_| "ETH".to_string());

        let base_fee = self
            .fees
            .base_fee()
            .map_err(|e| RelayerError::Config(e.to_string()))?;
        let gas_estimate = self
            .fees
            .gas_estimate()
            .map_err(|e| RelayerError::Config(e.to_string()))?;

        Ok(FeeEstimate {
            amount,
            base_fee,
            gas_estimate,
            total_fee: base_fee.saturating_add(gas_estimate),
            currency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::LedgerConnector;
    use crate::events::{sample_initiated, ChainEvent, TransferCompleted};
    use crate::store::MemoryStore;
    use crate::testing::{chain_config, wait_until, FakeConnector, TEST_KEY};
    use crate::transfer::sample_transfer;
    use ethers::types::H256;
    use std::time::Duration;

    const SOURCE: u64 = 80002;
    const DESTINATION: u64 = 421614;

    fn relayer_config() -> RelayerConfig {
        RelayerConfig {
            max_retries: 3,
            retry_initial_backoff_ms: 1,
            retry_max_backoff_ms: 2,
            shutdown_grace_secs: 1,
            ..Default::default()
        }
    }

    struct Harness {
        service: Arc<BridgeService>,
        source: Arc<FakeConnector>,
        destination: Arc<FakeConnector>,
    }

    async fn harness_with(store: Arc<MemoryStore>, with_signer: bool) -> Harness {
        let source = Arc::new(FakeConnector::new(SOURCE));
        let destination = Arc::new(FakeConnector::new(DESTINATION));
        let chains = ChainRegistry::new(vec![
            (
                chain_config(SOURCE, "Polygon Amoy", "MATIC"),
                source.clone() as Arc<dyn LedgerConnector>,
            ),
            (
                chain_config(DESTINATION, "Arbitrum Sepolia", "ETH"),
                destination.clone() as Arc<dyn LedgerConnector>,
            ),
        ]);
        let registry = Arc::new(TransferRegistry::open(store).await.unwrap());
        let signer = with_signer.then(|| AttestationSigner::from_private_key(TEST_KEY).unwrap());

        let service = Arc::new(BridgeService::new(
            chains,
            registry,
            signer,
            relayer_config(),
            FeeConfig::default(),
        ));
        Harness {
            service,
            source,
            destination,
        }
    }

    async fn harness(with_signer: bool) -> Harness {
        harness_with(Arc::new(MemoryStore::new()), with_signer).await
    }

    async fn status_of(service: &BridgeService, id: &MessageId) -> Option<TransferStatus> {
        service.registry.get(id).await.unwrap().map(|t| t.status)
    }

    async fn wait_for_status(service: &Arc<BridgeService>, id: MessageId, status: TransferStatus) {
        wait_until(|| {
            let service = service.clone();
            async move { status_of(&service, &id).await == Some(status) }
        })
        .await;
    }

    #[tokio::test]
    async fn test_relays_only_after_required_confirmations() {
        let h = harness(true).await;
        h.service.start().await.unwrap();

        let event = sample_initiated(SOURCE, 1, DESTINATION, 100);
        let id = event.message_id;
        h.source.set_height(100);
        h.source.emit(ChainEvent::TransferInitiated(event)).await;
        wait_for_status(&h.service, id, TransferStatus::AwaitingFinality).await;

        h.source.set_height(105);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(status_of(&h.service, &id).await, Some(TransferStatus::AwaitingFinality));
        assert!(h.destination.sends().is_empty());

        h.source.set_height(112);
        wait_for_status(&h.service, id, TransferStatus::Completed).await;

        let sends = h.destination.sends();
        assert_eq!(sends.len(), 1);
        assert_eq!(sends[0].message_id, id);

        let stats = h.service.get_stats().await;
        assert_eq!(stats.stats.successful_transfers, 1);
        assert_eq!(stats.stats.total_bridged, U256::from(5_000u64));
        assert_eq!(stats.stats.pending_transfers, 0);

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_log_submits_once() {
        let h = harness(true).await;
        h.service.start().await.unwrap();

        let event = sample_initiated(SOURCE, 2, DESTINATION, 100);
        let id = event.message_id;
        h.source.set_height(500);
        h.source.emit(ChainEvent::TransferInitiated(event.clone())).await;
        h.source.emit(ChainEvent::TransferInitiated(event)).await;

        wait_for_status(&h.service, id, TransferStatus::Completed).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(h.destination.sends().len(), 1);
        let all = h.service.registry.list(TransferFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_already_processed_counts_one_success() {
        let h = harness(true).await;
        h.destination.push_send_result(Err(RelayerError::OnChainRevert {
            chain_id: DESTINATION,
            reason: "MessageAlreadyProcessed()".to_string(),
        }));
        h.service.start().await.unwrap();

        let event = sample_initiated(SOURCE, 3, DESTINATION, 100);
        let id = event.message_id;
        h.source.set_height(500);
        h.source.emit(ChainEvent::TransferInitiated(event)).await;

        wait_for_status(&h.service, id, TransferStatus::Completed).await;

        let stored = h.service.registry.get(&id).await.unwrap().unwrap();
        assert!(stored.last_error.is_none());
        let stats = h.service.get_stats().await;
        assert_eq!(stats.stats.successful_transfers, 1);
        assert_eq!(stats.stats.failed_transfers, 0);

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_then_manual_relay() {
        let h = harness(true).await;
        for _ in 0..3 {
            h.destination.push_send_result(Err(RelayerError::Connectivity {
                chain_id: DESTINATION,
                message: "connection reset".to_string(),
            }));
        }
        h.service.start().await.unwrap();

        let event = sample_initiated(SOURCE, 4, DESTINATION, 100);
        let id = event.message_id;
        h.source.set_height(500);
        h.source.emit(ChainEvent::TransferInitiated(event)).await;

        wait_for_status(&h.service, id, TransferStatus::Failed).await;
        assert_eq!(h.destination.sends().len(), 3);
        let failed = h.service.registry.get(&id).await.unwrap().unwrap();
        assert!(failed.last_error.unwrap().contains("retry budget exhausted"));

        let reopened = h.service.relay_transfer(&id).await.unwrap();
        assert_eq!(reopened.status, TransferStatus::Relaying);
        assert!(reopened.last_error.is_none());

        wait_for_status(&h.service, id, TransferStatus::Completed).await;
        assert_eq!(h.destination.sends().len(), 4);

        assert!(matches!(
            h.service.relay_transfer(&id).await,
            Err(RelayerError::NotEligible { .. })
        ));

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_read_only_mode() {
        let h = harness(false).await;
        h.service.start().await.unwrap();
        assert!(!h.service.relay_enabled());
        assert!(!h.service.auto_relay_enabled());

        let event = sample_initiated(SOURCE, 5, DESTINATION, 100);
        let id = event.message_id;
        h.source.set_height(500);
        h.source.emit(ChainEvent::TransferInitiated(event)).await;
        wait_for_status(&h.service, id, TransferStatus::AwaitingFinality).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(status_of(&h.service, &id).await, Some(TransferStatus::AwaitingFinality));
        assert!(h.destination.sends().is_empty());
        assert!(matches!(
            h.service.relay_transfer(&id).await,
            Err(RelayerError::SignatureUnavailable)
        ));

        let stats = h.service.get_stats().await;
        assert!(!stats.relay_enabled);
        assert!(stats.relayer_address.is_none());

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_manual_relay_requires_finality() {
        let store = Arc::new(MemoryStore::new());
        let h = harness_with(store, true).await;
        let transfer = sample_transfer(6, SOURCE, DESTINATION, 100);
        let id = transfer.message_id;
        h.service.registry.insert_if_absent(transfer).await.unwrap();
        h.service
            .registry
            .transition(&id, StatusUpdate::to(TransferStatus::AwaitingFinality))
            .await
            .unwrap();

        h.source.set_height(105);
        assert!(matches!(
            h.service.relay_transfer(&id).await,
            Err(RelayerError::NotEligible { .. })
        ));

        h.source.set_height(112);
        let updated = h.service.relay_transfer(&id).await.unwrap();
        assert_eq!(updated.status, TransferStatus::Relaying);

        assert!(matches!(
            h.service.relay_transfer(&H256::repeat_byte(0xee)).await,
            Err(RelayerError::TransferNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_recovers_in_flight_transfers_on_start() {
        let store = Arc::new(MemoryStore::new());
        {
            let registry = TransferRegistry::open(store.clone()).await.unwrap();
            let detected = sample_transfer(7, SOURCE, DESTINATION, 100);
            registry.insert_if_absent(detected).await.unwrap();

            let relaying = sample_transfer(8, SOURCE, DESTINATION, 100);
            let relaying_id = relaying.message_id;
            registry.insert_if_absent(relaying).await.unwrap();
            for status in [TransferStatus::AwaitingFinality, TransferStatus::Relaying] {
                registry.transition(&relaying_id, StatusUpdate::to(status)).await.unwrap();
            }
        }

        let h = harness_with(store, true).await;
        h.service.start().await.unwrap();

        wait_for_status(&h.service, H256::from_low_u64_be(8), TransferStatus::Completed).await;
        assert_eq!(
            status_of(&h.service, &H256::from_low_u64_be(7)).await,
            Some(TransferStatus::AwaitingFinality)
        );

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_recovery_without_key_keeps_relaying() {
        let store = Arc::new(MemoryStore::new());
        let id = {
            let registry = TransferRegistry::open(store.clone()).await.unwrap();
            let relaying = sample_transfer(11, SOURCE, DESTINATION, 100);
            let id = relaying.message_id;
            registry.insert_if_absent(relaying).await.unwrap();
            for status in [TransferStatus::AwaitingFinality, TransferStatus::Relaying] {
                registry.transition(&id, StatusUpdate::to(status)).await.unwrap();
            }
            id
        };

        let h = harness_with(store, false).await;
        h.service.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(status_of(&h.service, &id).await, Some(TransferStatus::Relaying));
        assert!(h.destination.sends().is_empty());

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_chain_status() {
        let h = harness(true).await;

        let status = h.service.get_chain_status(SOURCE).await.unwrap();
        assert!(status.connected);
        assert_eq!(status.chain_name, "Polygon Amoy");
        assert_eq!(status.total_locked, Some(U256::from(5_000u64)));
        // read from getRemainingDailyLimit, not the stats tuple
        assert_eq!(status.remaining_limit, Some(U256::from(750_000u64)));
        assert!(status.error.is_none());

        h.destination.set_unreachable(true);
        let status = h.service.get_chain_status(DESTINATION).await.unwrap();
        assert!(!status.connected);
        assert!(status.remaining_limit.is_none());
        assert!(status.error.is_some());

        assert!(matches!(
            h.service.get_chain_status(1).await,
            Err(RelayerError::ChainNotConfigured { chain_id: 1 })
        ));
        assert_eq!(h.service.get_all_chains_status().await.len(), 2);

        let json = serde_json::to_value(h.service.get_chain_status(SOURCE).await.unwrap()).unwrap();
        assert_eq!(json["total_locked"], "5000");
        assert_eq!(json["remaining_limit"], "750000");
    }

    #[tokio::test]
    async fn test_transfer_status_falls_back_to_chain() {
        let h = harness(true).await;

        let local = sample_transfer(9, SOURCE, DESTINATION, 100);
        let local_id = local.message_id;
        h.service.registry.insert_if_absent(local).await.unwrap();
        let report = h.service.get_transfer_status(&local_id).await.unwrap();
        assert_eq!(report.status, "detected");
        assert!(matches!(report.detail, TransferDetail::Local(_)));

        let confirmed = H256::repeat_byte(0x10);
        h.service.start().await.unwrap();
        h.destination
            .emit(ChainEvent::TransferCompleted(TransferCompleted {
                chain_id: DESTINATION,
                message_id: confirmed,
                recipient: Address::zero(),
                amount: U256::one(),
                source_chain_id: SOURCE,
                block_number: 1,
                tx_hash: H256::zero(),
            }))
            .await;
        wait_until(|| {
            let service = h.service.clone();
            async move { service.processed.contains(&confirmed) }
        })
        .await;
        let report = h.service.get_transfer_status(&confirmed).await.unwrap();
        assert_eq!(report.status, "completed");
        assert!(matches!(report.detail, TransferDetail::Processed));

        let on_chain = H256::repeat_byte(0x11);
        h.source.insert_record(
            on_chain,
            OnChainTransferRecord {
                sender: Address::from_low_u64_be(1),
                recipient: Address::from_low_u64_be(2),
                amount: U256::from(10u64),
                source_chain_id: U256::from(SOURCE),
                destination_chain_id: U256::from(DESTINATION),
                timestamp: U256::from(1_700_000_000u64),
                processed: false,
                cancelled: true,
            },
        );
        let report = h.service.get_transfer_status(&on_chain).await.unwrap();
        assert_eq!(report.status, "cancelled");
        assert!(matches!(report.detail, TransferDetail::OnChain { chain_id: SOURCE, .. }));

        assert!(matches!(
            h.service.get_transfer_status(&H256::repeat_byte(0x12)).await,
            Err(RelayerError::TransferNotFound { .. })
        ));

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_cancel_transfer() {
        let h = harness(true).await;
        let transfer = sample_transfer(13, SOURCE, DESTINATION, 100);
        let id = transfer.message_id;
        h.service.registry.insert_if_absent(transfer).await.unwrap();

        let cancelled = h.service.cancel_transfer(&id).await.unwrap();
        assert_eq!(cancelled.status, TransferStatus::Cancelled);
        assert!(matches!(
            h.service.cancel_transfer(&id).await,
            Err(RelayerError::InvalidStateTransition { .. })
        ));
        assert!(matches!(
            h.service.relay_transfer(&id).await,
            Err(RelayerError::NotEligible { .. })
        ));
    }

    #[tokio::test]
    async fn test_estimate_fee() {
        let h = harness(true).await;

        let estimate = h
            .service
            .estimate_fee(SOURCE, DESTINATION, U256::exp10(18))
            .unwrap();
        assert_eq!(estimate.base_fee, U256::exp10(15));
        assert_eq!(estimate.gas_estimate, U256::from(500_000_000_000_000u64));
        assert_eq!(estimate.total_fee, U256::from(1_500_000_000_000_000u64));
        assert_eq!(estimate.currency, "MATIC");

        let unknown_source = h.service.estimate_fee(1, DESTINATION, U256::one()).unwrap();
        assert_eq!(unknown_source.currency, "ETH");

        assert!(matches!(
            h.service.estimate_fee(SOURCE, 1, U256::one()),
            Err(RelayerError::ChainNotConfigured { chain_id: 1 })
        ));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let h = harness(true).await;
        h.service.start().await.unwrap();
        assert!(h.service.start().await.is_err());
        h.service.shutdown().await;
    }
}
