//! Bridge Relayer - cross-chain transfer relay service
//!
//! Watches bridge contracts on every configured chain for `TransferInitiated`,
//! waits until the origin block is final, attests the transfer with the
//! relayer key and completes it on the destination chain.

pub mod api;
pub mod chain;
pub mod config;
pub mod contracts;
pub mod error;
pub mod events;
pub mod listener;
pub mod metrics;
pub mod processed;
pub mod registry;
pub mod relay;
pub mod retry;
pub mod service;
pub mod signer;
pub mod stats;
pub mod store;
pub mod transfer;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{RelayerError, RelayerResult};
pub use service::BridgeService;
