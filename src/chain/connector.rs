//! Ledger connector seam
//!
//! One connector per configured chain, holding that chain's RPC endpoints and
//! bridge contract address. Everything the relay pipeline needs from a chain
//! goes through this trait, so the pipeline can be driven by in-memory fakes.

use crate::error::RelayerResult;
use crate::events::ChainEvent;
use crate::transfer::MessageId;

use async_trait::async_trait;
use ethers::signers::LocalWallet;
use ethers::types::{Address, Bytes, H256, U256};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

/// `getTransferRecord` as stored by the bridge contract
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnChainTransferRecord {
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    pub source_chain_id: U256,
    pub destination_chain_id: U256,
    pub timestamp: U256,
    pub processed: bool,
    pub cancelled: bool,
}

/// `getBridgeStats` of one bridge contract
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OnChainBridgeStats {
    pub total_locked: U256,
    pub today_bridged: U256,
    pub remaining_limit: U256,
    pub current_nonce: U256,
}

/// Arguments of `completeTransfer` on the destination contract
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompleteTransferCall {
    pub message_id: MessageId,
    pub recipient: Address,
    pub amount: U256,
    pub source_chain_id: u64,
    pub signature: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayReceipt {
    pub tx_hash: H256,
    pub block_number: Option<u64>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    fn chain_id(&self) -> u64;

    /// Set once the subscription gave up reconnecting
    fn is_degraded(&self) -> bool;

    async fn current_height(&self) -> RelayerResult<u64>;

    /// `None` when the contract has no record of the message id
    async fn transfer_record(
        &self,
        message_id: MessageId,
    ) -> RelayerResult<Option<OnChainTransferRecord>>;

    async fn is_processed(&self, message_id: MessageId) -> RelayerResult<bool>;

    async fn remaining_daily_limit(&self) -> RelayerResult<U256>;

    async fn bridge_stats(&self) -> RelayerResult<OnChainBridgeStats>;

    /// Submit `completeTransfer` and wait for its receipt
    async fn send(
        &self,
        call: CompleteTransferCall,
        wallet: &LocalWallet,
    ) -> RelayerResult<RelayReceipt>;

    /// Deliver bridge events into `sink` until shutdown. Events may be
    /// delivered more than once; each scanned range ends with a checkpoint.
    async fn subscribe(
        &self,
        from_block: Option<u64>,
        sink: mpsc::Sender<ChainEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> RelayerResult<()>;
}
