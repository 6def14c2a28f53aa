//! Nonce tracking for the relayer account on one chain
//!
//! Submissions to a chain are serialized by its relay queue, so the local
//! counter only has to survive failed broadcasts and external use of the key:
//! - released nonces are reused by the next submission
//! - "nonce too low" resyncs from the chain

use crate::error::{RelayerError, RelayerResult};

use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
struct NonceState {
    /// Next nonce to hand out
    current: u64,
    /// Highest nonce seen mined
    confirmed: Option<u64>,
}

impl NonceState {
    fn seed(on_chain_nonce: u64) -> Self {
        Self {
            current: on_chain_nonce,
            confirmed: on_chain_nonce.checked_sub(1),
        }
    }
}

/// Local nonce counter for one chain
#[derive(Debug)]
pub struct NonceTracker {
    chain_id: u64,
    state: Mutex<Option<NonceState>>,
}

impl NonceTracker {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            state: Mutex::new(None),
        }
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.is_some()
    }

    /// Seed from the account's on-chain transaction count
    pub async fn init(&self, on_chain_nonce: u64) {
        *self.state.lock().await = Some(NonceState::seed(on_chain_nonce));
        debug!(chain_id = self.chain_id, nonce = on_chain_nonce, "Initialized nonce");
    }

    /// Get the next nonce
    pub async fn allocate(&self) -> RelayerResult<u64> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or_else(|| RelayerError::Nonce {
            chain_id: self.chain_id,
            message: "Nonce not initialized".to_string(),
        })?;

        let nonce = state.current;
        state.current += 1;

        debug!(chain_id = self.chain_id, nonce, "Allocated nonce");
        Ok(nonce)
    }

    /// Transaction mined
    pub async fn confirm(&self, nonce: u64) {
        if let Some(state) = self.state.lock().await.as_mut() {
            if state.confirmed.map_or(true, |c| nonce > c) {
                state.confirmed = Some(nonce);
            }
        }
    }

    /// Broadcast failed, the nonce can be reused
    pub async fn release(&self, nonce: u64) {
        if let Some(state) = self.state.lock().await.as_mut() {
            if state.current == nonce + 1 {
                state.current = nonce;
            }
        }
    }

    /// Realign with the chain after a nonce rejection
    pub async fn sync(&self, on_chain_nonce: u64) {
        let mut guard = self.state.lock().await;
        let state = guard.get_or_insert_with(|| NonceState::seed(on_chain_nonce));

        let expected = state.confirmed.map_or(0, |c| c + 1);
        if on_chain_nonce > expected {
            warn!(
                chain_id = self.chain_id,
                expected,
                on_chain = on_chain_nonce,
                "Nonce gap detected, relayer key used elsewhere?"
            );
        }
        if on_chain_nonce != state.current {
            debug!(
                chain_id = self.chain_id,
                local = state.current,
                on_chain = on_chain_nonce,
                "Resyncing nonce"
            );
        }

        *state = NonceState::seed(on_chain_nonce);
    }
}
