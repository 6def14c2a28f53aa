//! Transfer Registry: the single synchronization point for transfer state
//!
//! Every creation goes through `insert_if_absent` and every status change
//! through `transition`, which checks the state machine and then performs a
//! compare-and-set against the store. Losing a race re-reads and re-checks, so
//! two concurrent callers can never both apply the same move.

use crate::error::{RelayerError, RelayerResult};
use crate::stats::{Stats, StatsAggregator};
use crate::store::{TransferFilter, TransferStore};
use crate::transfer::{fmt_message_id, MessageId, StatusUpdate, Transfer, TransferStatus};

use std::sync::Arc;
use tracing::{debug, info, warn};

const MAX_CAS_ATTEMPTS: usize = 8;

pub struct TransferRegistry {
    store: Arc<dyn TransferStore>,
    stats: StatsAggregator,
}

impl TransferRegistry {
    /// Open over a store, rebuilding stats from whatever it already holds
    pub async fn open(store: Arc<dyn TransferStore>) -> RelayerResult<Self> {
        let existing = store.list(TransferFilter::default()).await?;
        let stats = StatsAggregator::new();
        stats.rebuild(&existing).await;

        if !existing.is_empty() {
            info!("Transfer registry loaded {} stored transfers", existing.len());
        }

        Ok(Self { store, stats })
    }

    /// Insert a newly observed transfer. `Ok(false)` means the id was already known.
    pub async fn insert_if_absent(&self, transfer: Transfer) -> RelayerResult<bool> {
        transfer.validate()?;

        let inserted = self.store.insert_if_absent(&transfer).await?;
        if inserted {
            self.stats.record(None, &transfer).await;
            crate::metrics::record_transfer_detected(transfer.source_chain_id);
        } else {
            debug!(
                message_id = %fmt_message_id(&transfer.message_id),
                "Duplicate transfer detection ignored"
            );
        }
        Ok(inserted)
    }

    pub async fn get(&self, message_id: &MessageId) -> RelayerResult<Option<Transfer>> {
        self.store.get(message_id).await
    }

    /// Apply a status change if the state machine allows it from the stored status
    pub async fn transition(
        &self,
        message_id: &MessageId,
        update: StatusUpdate,
    ) -> RelayerResult<Transfer> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let current = self
                .store
                .get(message_id)
                .await?
                .ok_or_else(|| RelayerError::TransferNotFound {
                    message_id: fmt_message_id(message_id),
                })?;

            if !current.status.can_transition_to(update.status) {
                warn!(
                    message_id = %fmt_message_id(message_id),
                    from = %current.status,
                    to = %update.status,
                    "Rejected illegal transfer transition"
                );
                crate::metrics::record_rejected_transition();
                return Err(RelayerError::InvalidStateTransition {
                    from: current.status.to_string(),
                    to: update.status.to_string(),
                });
            }

            let next = update.apply(&current);
            if self.store.compare_and_set(&next, current.status).await? {
                debug!(
                    message_id = %fmt_message_id(message_id),
                    from = %current.status,
                    to = %next.status,
                    "Transfer transitioned"
                );
                self.stats.record(Some(current.status), &next).await;
                crate::metrics::record_transition(&next);
                return Ok(next);
            }

            debug!(
                message_id = %fmt_message_id(message_id),
                "Transfer changed concurrently, re-checking transition"
            );
        }

        Err(RelayerError::Internal(format!(
            "Transfer {} under contention, transition to {} abandoned",
            fmt_message_id(message_id),
            update.status
        )))
    }

    pub async fn list(&self, filter: TransferFilter) -> RelayerResult<Vec<Transfer>> {
        self.store.list(filter).await
    }

    pub async fn stats(&self) -> Stats {
        self.stats.snapshot().await
    }

    pub async fn get_checkpoint(&self, chain_id: u64) -> RelayerResult<Option<u64>> {
        self.store.get_checkpoint(chain_id).await
    }

    pub async fn save_checkpoint(&self, chain_id: u64, block_number: u64) -> RelayerResult<()> {
        self.store.save_checkpoint(chain_id, block_number).await
    }

    pub async fn health_check(&self) -> RelayerResult<()> {
        self.store.health_check().await
    }
}
