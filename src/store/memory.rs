//! In-process transfer store

use super::{TransferFilter, TransferStore};
use crate::error::RelayerResult;
use crate::transfer::{MessageId, Transfer, TransferStatus};

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// DashMap-backed store. Shard locks are held only for the duration of a
/// single map operation, never across an await.
#[derive(Debug, Default)]
pub struct MemoryStore {
    transfers: DashMap<MessageId, Transfer>,
    checkpoints: DashMap<u64, u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.transfers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transfers.is_empty()
    }
}

#[async_trait]
impl TransferStore for MemoryStore {
    async fn insert_if_absent(&self, transfer: &Transfer) -> RelayerResult<bool> {
        match self.transfers.entry(transfer.message_id) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(transfer.clone());
                Ok(true)
            }
        }
    }

    async fn get(&self, message_id: &MessageId) -> RelayerResult<Option<Transfer>> {
        Ok(self.transfers.get(message_id).map(|t| t.clone()))
    }

    async fn compare_and_set(
        &self,
        next: &Transfer,
        expected: TransferStatus,
    ) -> RelayerResult<bool> {
        match self.transfers.get_mut(&next.message_id) {
            Some(mut current) if current.status == expected => {
                *current = next.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, filter: TransferFilter) -> RelayerResult<Vec<Transfer>> {
        Ok(self
            .transfers
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn get_checkpoint(&self, chain_id: u64) -> RelayerResult<Option<u64>> {
        Ok(self.checkpoints.get(&chain_id).map(|b| *b))
    }

    async fn save_checkpoint(&self, chain_id: u64, block_number: u64) -> RelayerResult<()> {
        self.checkpoints.insert(chain_id, block_number);
        Ok(())
    }

    async fn health_check(&self) -> RelayerResult<()> {
        Ok(())
    }
}
