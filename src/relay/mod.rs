//! Relay submission
//!
//! Every destination chain gets one bounded queue and exactly one executor
//! draining it, so completions for a chain are submitted one at a time from
//! the relayer account. Different destinations relay concurrently.

mod executor;

pub use executor::RelayExecutor;

use crate::error::{RelayerError, RelayerResult};
use crate::transfer::{fmt_message_id, MessageId};

use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Routes transfers that entered `RELAYING` to their destination's queue
#[derive(Debug, Clone)]
pub struct RelayDispatcher {
    queues: HashMap<u64, mpsc::Sender<MessageId>>,
}

impl RelayDispatcher {
    /// Build one queue per destination chain, returning the receiving ends for the executors
    pub fn new(
        chain_ids: impl IntoIterator<Item = u64>,
        capacity: usize,
    ) -> (Self, HashMap<u64, mpsc::Receiver<MessageId>>) {
        let mut queues = HashMap::new();
        let mut receivers = HashMap::new();

        for chain_id in chain_ids {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            queues.insert(chain_id, tx);
            receivers.insert(chain_id, rx);
        }

        (Self { queues }, receivers)
    }

    pub fn has_queue(&self, chain_id: u64) -> bool {
        self.queues.contains_key(&chain_id)
    }

    /// Queue a transfer for submission, waiting for room if the queue is full
    pub async fn enqueue(&self, destination_chain_id: u64, message_id: MessageId) -> RelayerResult<()> {
        let queue = self
            .queues
            .get(&destination_chain_id)
            .ok_or(RelayerError::ChainNotConfigured {
                chain_id: destination_chain_id,
            })?;

        queue.send(message_id).await.map_err(|_| {
            RelayerError::Internal(format!(
                "relay queue for chain {} is closed",
                destination_chain_id
            ))
        })?;

        debug!(
            chain_id = destination_chain_id,
            message_id = %fmt_message_id(&message_id),
            "Queued for relay"
        );
        Ok(())
    }
}
