//! Transfer records and the relay state machine

use crate::error::{RelayerError, RelayerResult};

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque unique handle for one cross-chain transfer, emitted by the source contract
pub type MessageId = H256;

/// Full hex rendering of a message id (`H256`'s `Display` abbreviates)
pub fn fmt_message_id(id: &MessageId) -> String {
    format!("{:?}", id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    Detected,
    AwaitingFinality,
    Relaying,
    Completed,
    Failed,
    Cancelled,
}

impl TransferStatus {
    pub const ALL: [TransferStatus; 6] = [
        TransferStatus::Detected,
        TransferStatus::AwaitingFinality,
        TransferStatus::Relaying,
        TransferStatus::Completed,
        TransferStatus::Failed,
        TransferStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Detected => "detected",
            TransferStatus::AwaitingFinality => "awaiting_finality",
            TransferStatus::Relaying => "relaying",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
            TransferStatus::Cancelled => "cancelled",
        }
    }

    /// No automatic transition leaves these states
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Failed | TransferStatus::Cancelled
        )
    }

    /// No transition at all leaves these states
    pub fn is_absorbing(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Cancelled)
    }

    /// Counted in the pending total
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TransferStatus::Detected | TransferStatus::AwaitingFinality | TransferStatus::Relaying
        )
    }

    /// Legal moves of the relay state machine
    pub fn can_transition_to(&self, next: TransferStatus) -> bool {
        use TransferStatus::*;

        match (self, next) {
            (Detected, AwaitingFinality) => true,
            (AwaitingFinality, AwaitingFinality) => true,
            (AwaitingFinality, Relaying) => true,
            (Relaying, Completed) => true,
            (Relaying, Failed) => true,
            (Failed, Relaying) => true,
            // faults surfaced while handling the event or evaluating finality
            (Detected, Failed) | (AwaitingFinality, Failed) => true,
            (Detected | AwaitingFinality | Relaying | Failed, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransferStatus {
    type Err = RelayerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransferStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| RelayerError::Internal(format!("Unknown transfer status: {}", s)))
    }
}

/// One cross-chain transfer as tracked by the relayer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transfer {
    pub message_id: MessageId,
    pub sender: Address,
    pub recipient: Address,
    pub amount: U256,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub origin_block: u64,
    pub detected_at: DateTime<Utc>,
    pub status: TransferStatus,
    pub relay_tx_hash: Option<H256>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    /// Build a freshly detected transfer, checking record invariants
    pub fn detected(
        message_id: MessageId,
        sender: Address,
        recipient: Address,
        amount: U256,
        source_chain_id: u64,
        destination_chain_id: u64,
        origin_block: u64,
    ) -> RelayerResult<Self> {
        let now = Utc::now();
        let transfer = Self {
            message_id,
            sender,
            recipient,
            amount,
            source_chain_id,
            destination_chain_id,
            origin_block,
            detected_at: now,
            status: TransferStatus::Detected,
            relay_tx_hash: None,
            last_error: None,
            updated_at: now,
        };
        transfer.validate()?;
        Ok(transfer)
    }

    pub fn validate(&self) -> RelayerResult<()> {
        if self.amount.is_zero() {
            return Err(RelayerError::InvalidTransfer(format!(
                "transfer {} has zero amount",
                fmt_message_id(&self.message_id)
            )));
        }
        if self.source_chain_id == self.destination_chain_id {
            return Err(RelayerError::InvalidTransfer(format!(
                "transfer {} has identical source and destination chain {}",
                fmt_message_id(&self.message_id),
                self.source_chain_id
            )));
        }
        Ok(())
    }

    /// Confirmations of the origin block at the given source height
    pub fn confirmations_at(&self, current_height: u64) -> u64 {
        current_height.saturating_sub(self.origin_block)
    }
}

/// A requested status change plus the fields the relay path records with it
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub status: TransferStatus,
    pub relay_tx_hash: Option<H256>,
    pub last_error: Option<String>,
}

impl StatusUpdate {
    pub fn to(status: TransferStatus) -> Self {
        Self {
            status,
            relay_tx_hash: None,
            last_error: None,
        }
    }

    pub fn with_tx_hash(mut self, tx_hash: H256) -> Self {
        self.relay_tx_hash = Some(tx_hash);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    /// Apply to a copy of `current`. The caller has already checked legality.
    pub fn apply(&self, current: &Transfer) -> Transfer {
        let mut next = current.clone();
        next.status = self.status;
        if let Some(tx_hash) = self.relay_tx_hash {
            next.relay_tx_hash = Some(tx_hash);
        }
        next.last_error = self.last_error.clone();
        next.updated_at = Utc::now();
        next
    }
}

#[cfg(test)]
pub(crate) fn sample_transfer(id: u64, source: u64, destination: u64, origin_block: u64) -> Transfer {
    Transfer::detected(
        H256::from_low_u64_be(id),
        Address::from_low_u64_be(0xa11ce),
        Address::from_low_u64_be(0xb0b),
        U256::from(1_000_000u64),
        source,
        destination,
        origin_block,
    )
    .unwrap()
}
