//! Event listener: one consumer loop per chain
//!
//! Drains the chain's event channel in delivery order. Log redelivery is
//! expected, so a `TransferInitiated` for a known message id is dropped
//! without touching the stored record. Nothing raised while handling an
//! event escapes the loop.

use crate::error::{RelayerError, RelayerResult};
use crate::events::{ChainEvent, TransferCompleted, TransferInitiated};
use crate::processed::ProcessedSet;
use crate::registry::TransferRegistry;
use crate::transfer::{fmt_message_id, MessageId, StatusUpdate, TransferStatus};

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub struct EventListener {
    chain_id: u64,
    registry: Arc<TransferRegistry>,
    processed: Arc<ProcessedSet>,
    /// Finality monitor of this chain
    finality: mpsc::Sender<MessageId>,
}

impl EventListener {
    pub fn new(
        chain_id: u64,
        registry: Arc<TransferRegistry>,
        processed: Arc<ProcessedSet>,
        finality: mpsc::Sender<MessageId>,
    ) -> Self {
        Self {
            chain_id,
            registry,
            processed,
            finality,
        }
    }

    /// Consume events until shutdown or until the connector side closes
    pub async fn run(self, mut events: mpsc::Receiver<ChainEvent>, mut shutdown: watch::Receiver<bool>) {
        info!(chain_id = self.chain_id, "Event listener started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
            }
        }

        info!(chain_id = self.chain_id, "Event listener stopped");
    }

    /// Handle one event. Failures are logged and, where a transfer is
    /// involved, recorded on it.
    pub async fn handle(&self, event: ChainEvent) {
        crate::metrics::record_event(self.chain_id, &event);

        match event {
            ChainEvent::TransferInitiated(initiated) => {
                if let Err(e) = self.on_initiated(&initiated).await {
                    error!(
                        chain_id = self.chain_id,
                        message_id = %fmt_message_id(&initiated.message_id),
                        "Failed to handle TransferInitiated: {}", e
                    );
                    self.mark_failed(&initiated.message_id, &e).await;
                }
            }
            ChainEvent::TransferCompleted(completed) => self.on_completed(&completed),
            ChainEvent::Checkpoint { block_number, .. } => {
                if let Err(e) = self.registry.save_checkpoint(self.chain_id, block_number).await {
                    warn!(chain_id = self.chain_id, block_number, "Failed to save checkpoint: {}", e);
                }
            }
        }
    }

    async fn on_initiated(&self, initiated: &TransferInitiated) -> RelayerResult<()> {
        let transfer = match initiated.to_transfer() {
            Ok(transfer) => transfer,
            Err(e) => {
                warn!(
                    chain_id = self.chain_id,
                    message_id = %fmt_message_id(&initiated.message_id),
                    tx_hash = ?initiated.tx_hash,
                    "Dropping malformed TransferInitiated: {}", e
                );
                return Ok(());
            }
        };
        let message_id = transfer.message_id;

        if !self.registry.insert_if_absent(transfer).await? {
            crate::metrics::record_duplicate_event(self.chain_id);
            debug!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(&message_id),
                "Duplicate TransferInitiated ignored"
            );
            return Ok(());
        }

        info!(
            chain_id = self.chain_id,
            message_id = %fmt_message_id(&message_id),
            destination = initiated.destination_chain_id,
            amount = %initiated.amount,
            block_number = initiated.block_number,
            "Transfer detected"
        );

        self.registry
            .transition(&message_id, StatusUpdate::to(TransferStatus::AwaitingFinality))
            .await?;

        if self.finality.try_send(message_id).is_err() {
            // next sweep picks it up
            debug!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(&message_id),
                "Finality notification dropped"
            );
        }
        Ok(())
    }

    fn on_completed(&self, completed: &TransferCompleted) {
        if self.processed.insert(completed.message_id) {
            debug!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(&completed.message_id),
                source = completed.source_chain_id,
                "Destination confirmed transfer"
            );
        }
    }

    async fn mark_failed(&self, message_id: &MessageId, cause: &RelayerError) {
        let update = StatusUpdate::to(TransferStatus::Failed).with_error(cause.to_string());
        match self.registry.transition(message_id, update).await {
            Ok(_) | Err(RelayerError::TransferNotFound { .. }) => {}
            Err(e) => warn!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(message_id),
                "Could not mark transfer failed: {}", e
            ),
        }
    }
}
