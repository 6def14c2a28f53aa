//! Chain finality gating for detected transfers
//!
//! Finality here is probabilistic: a transfer is relayable once its origin
//! block has `required_confirmations` blocks on top of it. Known chains carry
//! defaults (see `recommended_confirmations`), any chain may override.
//!
//! Each source chain runs one monitor. It evaluates new transfers as soon as
//! the listener reports them and re-sweeps everything still awaiting finality
//! on a fixed interval, so a transfer never depends on later chain activity
//! to be looked at again.

use super::connector::LedgerConnector;
use crate::config::{ChainConfig, RelayerConfig};
use crate::error::{RelayerError, RelayerResult};
use crate::registry::TransferRegistry;
use crate::relay::RelayDispatcher;
use crate::store::TransferFilter;
use crate::transfer::{fmt_message_id, MessageId, StatusUpdate, Transfer, TransferStatus};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// Outcome of evaluating one transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalityOutcome {
    /// Below the confirmation threshold
    Pending { confirmations: u64 },
    /// Final, but automatic relay is off
    Final,
    /// Moved to `RELAYING` and queued
    Promoted,
    /// Already moved on by someone else
    Skipped,
    /// Destination unknown, marked `FAILED`
    Rejected,
}

/// Watches transfers originating on one chain until they are final
pub struct FinalityMonitor {
    chain_id: u64,
    required_confirmations: u64,
    poll_interval: Duration,
    connector: Arc<dyn LedgerConnector>,
    registry: Arc<TransferRegistry>,
    dispatcher: Arc<RelayDispatcher>,
    auto_relay: bool,
}

impl FinalityMonitor {
    pub fn new(
        config: &ChainConfig,
        relayer: &RelayerConfig,
        connector: Arc<dyn LedgerConnector>,
        registry: Arc<TransferRegistry>,
        dispatcher: Arc<RelayDispatcher>,
        auto_relay: bool,
    ) -> Self {
        Self {
            chain_id: config.chain_id,
            required_confirmations: config.required_confirmations(),
            poll_interval: config.poll_interval(relayer),
            connector,
            registry,
            dispatcher,
            auto_relay,
        }
    }

    /// Evaluate notified transfers immediately and sweep on every tick until shutdown
    pub async fn run(
        self,
        mut notifications: mpsc::Receiver<MessageId>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            chain_id = self.chain_id,
            required_confirmations = self.required_confirmations,
            "Finality monitor started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                Some(message_id) = notifications.recv() => {
                    if let Err(e) = self.check(&message_id).await {
                        warn!(
                            chain_id = self.chain_id,
                            message_id = %fmt_message_id(&message_id),
                            "Finality check failed: {}", e
                        );
                    }
                }
            }
        }

        info!(chain_id = self.chain_id, "Finality monitor stopped");
    }

    /// Re-evaluate every transfer from this chain still awaiting finality.
    /// Returns how many were promoted.
    pub async fn sweep(&self) -> usize {
        let awaiting = match self
            .registry
            .list(TransferFilter::status(TransferStatus::AwaitingFinality).from_source(self.chain_id))
            .await
        {
            Ok(awaiting) => awaiting,
            Err(e) => {
                error!(chain_id = self.chain_id, "Failed to list awaiting transfers: {}", e);
                return 0;
            }
        };

        if awaiting.is_empty() {
            return 0;
        }

        let height = match self.connector.current_height().await {
            Ok(height) => height,
            Err(e) => {
                warn!(chain_id = self.chain_id, "Finality sweep skipped: {}", e);
                return 0;
            }
        };

        let mut promoted = 0;
        for transfer in &awaiting {
            match self.evaluate(transfer, height).await {
                Ok(FinalityOutcome::Promoted) => promoted += 1,
                Ok(_) => {}
                Err(e) => error!(
                    chain_id = self.chain_id,
                    message_id = %fmt_message_id(&transfer.message_id),
                    "Finality evaluation failed: {}", e
                ),
            }
        }

        if promoted > 0 {
            debug!(chain_id = self.chain_id, height, promoted, "Finality sweep promoted transfers");
        }
        promoted
    }

    /// Evaluate a single transfer against the current chain height
    pub async fn check(&self, message_id: &MessageId) -> RelayerResult<FinalityOutcome> {
        let transfer = self
            .registry
            .get(message_id)
            .await?
            .ok_or_else(|| RelayerError::TransferNotFound {
                message_id: fmt_message_id(message_id),
            })?;

        if transfer.status != TransferStatus::AwaitingFinality {
            return Ok(FinalityOutcome::Skipped);
        }

        let height = self.connector.current_height().await?;
        self.evaluate(&transfer, height).await
    }

    /// Decide on one awaiting transfer given the source chain height
    pub async fn evaluate(&self, transfer: &Transfer, height: u64) -> RelayerResult<FinalityOutcome> {
        let message_id = &transfer.message_id;

        if !self.dispatcher.has_queue(transfer.destination_chain_id) {
            let reason = RelayerError::ChainNotConfigured {
                chain_id: transfer.destination_chain_id,
            }
            .to_string();
            warn!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(message_id),
                "Transfer targets an unserved chain: {}", reason
            );
            return match self
                .registry
                .transition(message_id, StatusUpdate::to(TransferStatus::Failed).with_error(reason))
                .await
            {
                Ok(_) => Ok(FinalityOutcome::Rejected),
                Err(RelayerError::InvalidStateTransition { .. }) => Ok(FinalityOutcome::Skipped),
                Err(e) => Err(e),
            };
        }

        let confirmations = transfer.confirmations_at(height);
        if confirmations < self.required_confirmations {
            debug!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(message_id),
                confirmations,
                required = self.required_confirmations,
                "Awaiting finality"
            );
            return Ok(FinalityOutcome::Pending { confirmations });
        }

        if !self.auto_relay {
            debug!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(message_id),
                "Transfer final, automatic relay disabled"
            );
            return Ok(FinalityOutcome::Final);
        }

        match self
            .registry
            .transition(message_id, StatusUpdate::to(TransferStatus::Relaying))
            .await
        {
            Ok(_) => {}
            Err(RelayerError::InvalidStateTransition { .. }) => return Ok(FinalityOutcome::Skipped),
            Err(e) => return Err(e),
        }

        info!(
            chain_id = self.chain_id,
            message_id = %fmt_message_id(message_id),
            confirmations,
            destination = transfer.destination_chain_id,
            "Transfer final, relaying"
        );

        self.dispatcher
            .enqueue(transfer.destination_chain_id, *message_id)
            .await?;
        Ok(FinalityOutcome::Promoted)
    }
}

/// Default confirmation count for a chain
pub fn recommended_confirmations(chain_id: u64) -> u64 {
    match chain_id {
        // Polygon PoS
        137 => 256,
        // Arbitrum One
        42161 => 64,
        // zkSync Era
        324 => 32,
        // Polygon Amoy, Arbitrum Sepolia, zkSync Sepolia
        80002 | 421614 | 300 => 12,
        // Default conservative
        _ => 64,
    }
}
