//! Bridge contract events, normalized per chain
//!
//! Connectors decode raw logs into `ChainEvent`s and push them, in block
//! order, into one bounded channel per chain. A `Checkpoint` follows every
//! scanned block range so the consumer can persist progress only after it
//! has handled everything before it.

use crate::contracts::{BridgeContractEvents, TransferCompletedFilter, TransferInitiatedFilter};
use crate::error::{RelayerError, RelayerResult};
use crate::transfer::{MessageId, Transfer};

use ethers::contract::LogMeta;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

/// `TransferInitiated` as observed on the source chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferInitiated {
    /// Chain whose connector delivered the log
    pub chain_id: u64,
    pub message_id: MessageId,
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub timestamp: u64,
    pub block_number: u64,
    pub tx_hash: H256,
}

/// `TransferCompleted` as observed on the destination chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferCompleted {
    pub chain_id: u64,
    pub message_id: MessageId,
    pub recipient: Address,
    pub amount: U256,
    pub source_chain_id: u64,
    pub block_number: u64,
    pub tx_hash: H256,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainEvent {
    TransferInitiated(TransferInitiated),
    TransferCompleted(TransferCompleted),
    /// Every log up to and including `block_number` has been delivered
    Checkpoint { chain_id: u64, block_number: u64 },
}

impl ChainEvent {
    pub fn chain_id(&self) -> u64 {
        match self {
            ChainEvent::TransferInitiated(e) => e.chain_id,
            ChainEvent::TransferCompleted(e) => e.chain_id,
            ChainEvent::Checkpoint { chain_id, .. } => *chain_id,
        }
    }

    /// Get event name for metrics
    pub fn name(&self) -> &'static str {
        match self {
            ChainEvent::TransferInitiated(_) => "transfer_initiated",
            ChainEvent::TransferCompleted(_) => "transfer_completed",
            ChainEvent::Checkpoint { .. } => "checkpoint",
        }
    }

    pub fn block_number(&self) -> u64 {
        match self {
            ChainEvent::TransferInitiated(e) => e.block_number,
            ChainEvent::TransferCompleted(e) => e.block_number,
            ChainEvent::Checkpoint { block_number, .. } => *block_number,
        }
    }

    /// Decode an ABI-level log into a chain event
    pub fn from_log(chain_id: u64, event: BridgeContractEvents, meta: &LogMeta) -> RelayerResult<Self> {
        let block_number = meta.block_number.as_u64();
        let tx_hash = meta.transaction_hash;

        match event {
            BridgeContractEvents::TransferInitiatedFilter(TransferInitiatedFilter {
                message_id,
                sender,
                recipient,
                amount,
                source_chain_id,
                destination_chain_id,
                timestamp,
            }) => Ok(ChainEvent::TransferInitiated(TransferInitiated {
                chain_id,
                message_id: H256::from(message_id),
                sender,
                recipient,
                amount,
                source_chain_id: u256_to_u64(source_chain_id, "sourceChainId")?,
                destination_chain_id: u256_to_u64(destination_chain_id, "destinationChainId")?,
                timestamp: u256_to_u64(timestamp, "timestamp")?,
                block_number,
                tx_hash,
            })),
            BridgeContractEvents::TransferCompletedFilter(TransferCompletedFilter {
                message_id,
                recipient,
                amount,
                source_chain_id,
            }) => Ok(ChainEvent::TransferCompleted(TransferCompleted {
                chain_id,
                message_id: H256::from(message_id),
                recipient,
                amount,
                source_chain_id: u256_to_u64(source_chain_id, "sourceChainId")?,
                block_number,
                tx_hash,
            })),
        }
    }
}

impl TransferInitiated {
    /// Turn the log into a transfer candidate, checking it against the chain
    /// that delivered it
    pub fn to_transfer(&self) -> RelayerResult<Transfer> {
        if self.source_chain_id != self.chain_id {
            return Err(RelayerError::EventParsing(format!(
                "TransferInitiated on chain {} claims source chain {}",
                self.chain_id, self.source_chain_id
            )));
        }

        Transfer::detected(
            self.message_id,
            self.sender,
            self.recipient,
            self.amount,
            self.source_chain_id,
            self.destination_chain_id,
            self.block_number,
        )
    }
}

fn u256_to_u64(value: U256, field: &str) -> RelayerResult<u64> {
    if value.bits() > 64 {
        return Err(RelayerError::EventParsing(format!(
            "{} {} does not fit in u64",
            field, value
        )));
    }
    Ok(value.low_u64())
}

#[cfg(test)]
pub(crate) fn sample_initiated(chain_id: u64, id: u64, destination: u64, block_number: u64) -> TransferInitiated {
    TransferInitiated {
        chain_id,
        message_id: H256::from_low_u64_be(id),
        sender: Address::from_low_u64_be(0xa11ce),
        recipient: Address::from_low_u64_be(0xb0b),
        amount: U256::from(5_000u64),
        source_chain_id: chain_id,
        destination_chain_id: destination,
        timestamp: 1_700_000_000,
        block_number,
        tx_hash: H256::from_low_u64_be(block_number),
    }
}
