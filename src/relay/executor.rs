//! Relay executor: drives `RELAYING` transfers for one destination chain to a
//! terminal state.
//!
//! Outcome mapping for `completeTransfer`:
//! - receipt: `COMPLETED` with the relay tx hash
//! - revert saying the message was already processed: `COMPLETED`, no error
//! - any other revert: `FAILED` with the reason, unless the destination
//!   reports the message processed after all
//! - connectivity/timeout/nonce errors: retried with backoff, then `FAILED`

use crate::chain::connector::{CompleteTransferCall, LedgerConnector};
use crate::error::{RelayerError, RelayerResult};
use crate::processed::ProcessedSet;
use crate::registry::TransferRegistry;
use crate::retry::Backoff;
use crate::signer::{AttestationParams, AttestationSigner};
use crate::transfer::{fmt_message_id, MessageId, StatusUpdate, Transfer, TransferStatus};

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub struct RelayExecutor {
    chain_id: u64,
    connector: Arc<dyn LedgerConnector>,
    registry: Arc<TransferRegistry>,
    processed: Arc<ProcessedSet>,
    signer: Option<Arc<AttestationSigner>>,
    backoff: Backoff,
    shutdown: watch::Receiver<bool>,
}

impl RelayExecutor {
    pub fn new(
        connector: Arc<dyn LedgerConnector>,
        registry: Arc<TransferRegistry>,
        processed: Arc<ProcessedSet>,
        signer: Option<Arc<AttestationSigner>>,
        backoff: Backoff,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            chain_id: connector.chain_id(),
            connector,
            registry,
            processed,
            signer,
            backoff,
            shutdown,
        }
    }

    /// Drain the destination queue one transfer at a time until shutdown.
    /// A submission in flight when shutdown arrives is allowed to finish.
    pub async fn run(mut self, mut queue: mpsc::Receiver<MessageId>) {
        info!(chain_id = self.chain_id, "Relay executor started");
        let mut shutdown = self.shutdown.clone();

        loop {
            let message_id = tokio::select! {
                _ = shutdown.changed() => break,
                next = queue.recv() => match next {
                    Some(message_id) => message_id,
                    None => break,
                },
            };

            if let Err(e) = self.execute(&message_id).await {
                error!(
                    chain_id = self.chain_id,
                    message_id = %fmt_message_id(&message_id),
                    "Relay failed: {}", e
                );
                match self.fail(&message_id, e.to_string()).await {
                    Ok(_) | Err(RelayerError::InvalidStateTransition { .. }) => {}
                    Err(e) => warn!(
                        chain_id = self.chain_id,
                        message_id = %fmt_message_id(&message_id),
                        "Could not mark transfer failed: {}", e
                    ),
                }
            }
        }

        info!(chain_id = self.chain_id, "Relay executor stopped");
    }

    /// Relay one transfer. Returns the status it was left in.
    pub async fn execute(&mut self, message_id: &MessageId) -> RelayerResult<TransferStatus> {
        let transfer = self
            .registry
            .get(message_id)
            .await?
            .ok_or_else(|| RelayerError::TransferNotFound {
                message_id: fmt_message_id(message_id),
            })?;

        if transfer.status != TransferStatus::Relaying {
            debug!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(message_id),
                status = %transfer.status,
                "Transfer no longer relaying, skipped"
            );
            return Ok(transfer.status);
        }

        if self.processed.contains(message_id) {
            info!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(message_id),
                "Destination already processed transfer, no submission needed"
            );
            return self.complete(message_id, StatusUpdate::to(TransferStatus::Completed)).await;
        }

        match self.connector.is_processed(*message_id).await {
            Ok(true) => {
                info!(
                    chain_id = self.chain_id,
                    message_id = %fmt_message_id(message_id),
                    "Destination contract already processed transfer"
                );
                self.processed.insert(*message_id);
                return self.complete(message_id, StatusUpdate::to(TransferStatus::Completed)).await;
            }
            Ok(false) => {}
            // the submission itself reports an already processed message
            Err(e) => debug!(
                chain_id = self.chain_id,
                message_id = %fmt_message_id(message_id),
                "isProcessed lookup failed: {}", e
            ),
        }

        let Some(signer) = self.signer.clone() else {
            return Err(RelayerError::SignatureUnavailable);
        };

        let call = match self.build_call(&signer, &transfer) {
            Ok(call) => call,
            Err(e) => return self.fail(message_id, e.to_string()).await,
        };

        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            crate::metrics::record_relay_submitted(self.chain_id);

            match self.connector.send(call.clone(), signer.wallet()).await {
                Ok(receipt) => {
                    crate::metrics::record_relay_latency(self.chain_id, started.elapsed().as_secs_f64());
                    info!(
                        chain_id = self.chain_id,
                        message_id = %fmt_message_id(message_id),
                        tx_hash = ?receipt.tx_hash,
                        attempt = attempts,
                        "Transfer completed"
                    );
                    self.processed.insert(*message_id);
                    return self
                        .complete(
                            message_id,
                            StatusUpdate::to(TransferStatus::Completed).with_tx_hash(receipt.tx_hash),
                        )
                        .await;
                }
                Err(e) if e.is_already_processed() => {
                    info!(
                        chain_id = self.chain_id,
                        message_id = %fmt_message_id(message_id),
                        "Destination reports transfer already processed"
                    );
                    self.processed.insert(*message_id);
                    return self.complete(message_id, StatusUpdate::to(TransferStatus::Completed)).await;
                }
                Err(e) if e.is_retryable() && self.backoff.should_retry(attempts) => {
                    let delay = self.backoff.delay_for_attempt(attempts - 1);
                    warn!(
                        chain_id = self.chain_id,
                        message_id = %fmt_message_id(message_id),
                        attempt = attempts,
                        "Relay attempt failed, retrying in {:?}: {}", delay, e
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.changed() => {
                            // left RELAYING, re-queued on next start
                            warn!(
                                chain_id = self.chain_id,
                                message_id = %fmt_message_id(message_id),
                                "Shutdown during relay retry"
                            );
                            return Ok(TransferStatus::Relaying);
                        }
                    }
                }
                Err(e) if e.is_retryable() => {
                    let reason = format!("retry budget exhausted after {} attempts: {}", attempts, e);
                    return self.fail(message_id, reason).await;
                }
                Err(e @ RelayerError::OnChainRevert { .. }) => {
                    // a bare receipt revert can mean another relayer won the race
                    if let Ok(true) = self.connector.is_processed(*message_id).await {
                        info!(
                            chain_id = self.chain_id,
                            message_id = %fmt_message_id(message_id),
                            "Relay reverted but destination processed transfer: {}", e
                        );
                        self.processed.insert(*message_id);
                        return self.complete(message_id, StatusUpdate::to(TransferStatus::Completed)).await;
                    }
                    return self.fail(message_id, e.to_string()).await;
                }
                Err(e) => return self.fail(message_id, e.to_string()).await,
            }
        }
    }

    fn build_call(
        &self,
        signer: &AttestationSigner,
        transfer: &Transfer,
    ) -> RelayerResult<CompleteTransferCall> {
        let attestation = signer.sign(&AttestationParams::from(transfer))?;
        Ok(CompleteTransferCall {
            message_id: transfer.message_id,
            recipient: transfer.recipient,
            amount: transfer.amount,
            source_chain_id: transfer.source_chain_id,
            signature: attestation.to_bytes(),
        })
    }

    async fn complete(&self, message_id: &MessageId, update: StatusUpdate) -> RelayerResult<TransferStatus> {
        Ok(self.registry.transition(message_id, update).await?.status)
    }

    async fn fail(&self, message_id: &MessageId, reason: String) -> RelayerResult<TransferStatus> {
        error!(
            chain_id = self.chain_id,
            message_id = %fmt_message_id(message_id),
            "Transfer failed: {}", reason
        );
        let update = StatusUpdate::to(TransferStatus::Failed).with_error(reason);
        Ok(self.registry.transition(message_id, update).await?.status)
    }
}
