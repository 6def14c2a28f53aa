//! In-memory ledger for driving the relay pipeline in tests

use crate::chain::connector::{
    CompleteTransferCall, LedgerConnector, OnChainBridgeStats, OnChainTransferRecord,
    RelayReceipt,
};
use crate::config::{ChainConfig, GasPriceStrategy};
use crate::error::{RelayerError, RelayerResult};
use crate::events::ChainEvent;
use crate::transfer::MessageId;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use ethers::signers::LocalWallet;
use ethers::types::{H256, U256};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, watch};

pub const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

/// Scriptable chain: settable height, queued send outcomes, recorded submissions
pub struct FakeConnector {
    chain_id: u64,
    height: AtomicU64,
    degraded: AtomicBool,
    unreachable: AtomicBool,
    records: DashMap<MessageId, OnChainTransferRecord>,
    processed: DashSet<MessageId>,
    send_results: Mutex<VecDeque<RelayerResult<RelayReceipt>>>,
    sends: Mutex<Vec<CompleteTransferCall>>,
    feed_tx: mpsc::Sender<ChainEvent>,
    feed_rx: tokio::sync::Mutex<Option<mpsc::Receiver<ChainEvent>>>,
}

impl FakeConnector {
    pub fn new(chain_id: u64) -> Self {
        let (feed_tx, feed_rx) = mpsc::channel(256);
        Self {
            chain_id,
            height: AtomicU64::new(0),
            degraded: AtomicBool::new(false),
            unreachable: AtomicBool::new(false),
            records: DashMap::new(),
            processed: DashSet::new(),
            send_results: Mutex::new(VecDeque::new()),
            sends: Mutex::new(Vec::new()),
            feed_tx,
            feed_rx: tokio::sync::Mutex::new(Some(feed_rx)),
        }
    }

    pub fn set_height(&self, height: u64) {
        self.height.store(height, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Outcome of the next `send`; unscripted sends succeed
    pub fn push_send_result(&self, result: RelayerResult<RelayReceipt>) {
        self.send_results.lock().unwrap().push_back(result);
    }

    pub fn sends(&self) -> Vec<CompleteTransferCall> {
        self.sends.lock().unwrap().clone()
    }

    pub fn insert_record(&self, message_id: MessageId, record: OnChainTransferRecord) {
        self.records.insert(message_id, record);
    }

    /// Emit an event through the subscription
    pub async fn emit(&self, event: ChainEvent) {
        self.feed_tx.send(event).await.unwrap();
    }

    fn check_reachable(&self) -> RelayerResult<()> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(RelayerError::Connectivity {
                chain_id: self.chain_id,
                message: "connection refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LedgerConnector for FakeConnector {
    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    async fn current_height(&self) -> RelayerResult<u64> {
        self.check_reachable()?;
        Ok(self.height.load(Ordering::SeqCst))
    }

    async fn transfer_record(
        &self,
        message_id: MessageId,
    ) -> RelayerResult<Option<OnChainTransferRecord>> {
        self.check_reachable()?;
        Ok(self.records.get(&message_id).map(|r| r.clone()))
    }

    async fn is_processed(&self, message_id: MessageId) -> RelayerResult<bool> {
        self.check_reachable()?;
        Ok(self.processed.contains(&message_id))
    }

    async fn remaining_daily_limit(&self) -> RelayerResult<U256> {
        self.check_reachable()?;
        Ok(U256::from(750_000u64))
    }

    async fn bridge_stats(&self) -> RelayerResult<OnChainBridgeStats> {
        self.check_reachable()?;
        Ok(OnChainBridgeStats {
            total_locked: U256::from(5_000u64),
            today_bridged: U256::from(1_000u64),
            remaining_limit: U256::exp10(24),
            current_nonce: U256::from(3u64),
        })
    }

    async fn send(
        &self,
        call: CompleteTransferCall,
        _wallet: &LocalWallet,
    ) -> RelayerResult<RelayReceipt> {
        let message_id = call.message_id;
        let attempt = {
            let mut sends = self.sends.lock().unwrap();
            sends.push(call);
            sends.len() as u64
        };

        let scripted = self.send_results.lock().unwrap().pop_front();
        let result = scripted.unwrap_or_else(|| {
            Ok(RelayReceipt {
                tx_hash: H256::from_low_u64_be(0xdead_0000 + attempt),
                block_number: Some(self.height.load(Ordering::SeqCst)),
            })
        });

        if result.is_ok() {
            self.processed.insert(message_id);
        }
        result
    }

    async fn subscribe(
        &self,
        _from_block: Option<u64>,
        sink: mpsc::Sender<ChainEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> RelayerResult<()> {
        let Some(mut feed) = self.feed_rx.lock().await.take() else {
            return Ok(());
        };

        loop {
            tokio::select! {
                event = feed.recv() => match event {
                    Some(event) => {
                        if sink.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    None => return Ok(()),
                },
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }
}

/// Enabled chain with a 12 block finality threshold and a fast poll interval
pub fn chain_config(chain_id: u64, name: &str, currency: &str) -> ChainConfig {
    ChainConfig {
        chain_id,
        name: name.to_string(),
        rpc_urls: vec!["http://localhost:8545".to_string()],
        bridge_address: Some("0x00000000000000000000000000000000000000aa".to_string()),
        confirmations: Some(12),
        native_currency: currency.to_string(),
        explorer_url: None,
        is_testnet: true,
        poll_interval_ms: Some(10),
        start_block: None,
        gas_price_strategy: GasPriceStrategy::Eip1559,
        enabled: true,
    }
}

/// Poll until `condition` holds, panicking after two seconds
pub async fn wait_until<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(2);
    while !condition().await {
        if tokio::time::Instant::now() > deadline {
            panic!("condition not reached in time");
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
}
