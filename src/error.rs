//! Error types for the bridge relayer

use thiserror::Error;

/// Revert reasons that mean the destination contract already completed the
/// transfer. Matched case-insensitively against the decoded reason.
const ALREADY_PROCESSED_MARKERS: &[&str] = &[
    "already processed",
    "alreadyprocessed",
    "message already processed",
    "transfer already completed",
];

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum RelayerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Connectivity error on chain {chain_id}: {message}")]
    Connectivity { chain_id: u64, message: String },

    #[error("Transaction reverted on chain {chain_id}: {reason}")]
    OnChainRevert { chain_id: u64, reason: String },

    #[error("Relayer signing key unavailable - running in status-only mode")]
    SignatureUnavailable,

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Chain {chain_id} not configured")]
    ChainNotConfigured { chain_id: u64 },

    #[error("Chain {chain_id} degraded after {attempts} failed reconnect attempts")]
    ChainDegraded { chain_id: u64, attempts: u32 },

    #[error("Transfer {message_id} not found")]
    TransferNotFound { message_id: String },

    #[error("Transfer {message_id} is not eligible for relay (status {status})")]
    NotEligible { message_id: String, status: String },

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("Event parsing error: {0}")]
    EventParsing(String),

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Nonce error for chain {chain_id}: {message}")]
    Nonce { chain_id: u64, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::Connectivity { .. }
                | RelayerError::Timeout { .. }
                | RelayerError::Nonce { .. }
        )
    }

    /// A revert whose reason says the destination already holds this message id.
    pub fn is_already_processed(&self) -> bool {
        match self {
            RelayerError::OnChainRevert { reason, .. } => is_already_processed_reason(reason),
            _ => false,
        }
    }
}

/// Check a decoded revert reason against the known "already processed" markers
pub fn is_already_processed_reason(reason: &str) -> bool {
    let reason = reason.to_lowercase();
    ALREADY_PROCESSED_MARKERS
        .iter()
        .any(|marker| reason.contains(marker))
}

/// Result type for relayer operations
pub type RelayerResult<T> = Result<T, RelayerError>;
