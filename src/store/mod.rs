//! Transfer persistence
//!
//! Two backends behind one trait, chosen once at startup:
//! - `MemoryStore`: in-process map, lost on restart
//! - `PostgresStore`: durable, shared, restart-safe
//!
//! Both provide atomic insert-if-absent and compare-and-set on status, which
//! is all the registry needs for at-most-once processing.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::error::RelayerResult;
use crate::transfer::{MessageId, Transfer, TransferStatus};

use async_trait::async_trait;

/// Selection criteria for listing transfers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferFilter {
    pub status: Option<TransferStatus>,
    pub source_chain_id: Option<u64>,
}

impl TransferFilter {
    pub fn status(status: TransferStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn from_source(mut self, chain_id: u64) -> Self {
        self.source_chain_id = Some(chain_id);
        self
    }

    pub fn matches(&self, transfer: &Transfer) -> bool {
        self.status.map_or(true, |s| transfer.status == s)
            && self
                .source_chain_id
                .map_or(true, |c| transfer.source_chain_id == c)
    }
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert unless the message id is already present. Returns whether it was inserted.
    async fn insert_if_absent(&self, transfer: &Transfer) -> RelayerResult<bool>;

    async fn get(&self, message_id: &MessageId) -> RelayerResult<Option<Transfer>>;

    /// Replace the record only if its stored status still equals `expected`
    async fn compare_and_set(
        &self,
        next: &Transfer,
        expected: TransferStatus,
    ) -> RelayerResult<bool>;

    async fn list(&self, filter: TransferFilter) -> RelayerResult<Vec<Transfer>>;

    /// Last block fully scanned for events on a chain
    async fn get_checkpoint(&self, chain_id: u64) -> RelayerResult<Option<u64>>;

    async fn save_checkpoint(&self, chain_id: u64, block_number: u64) -> RelayerResult<()>;

    async fn health_check(&self) -> RelayerResult<()>;
}
