//! Relayer attestation over transfer parameters
//!
//! Digest layout (tightly packed, big-endian, 148 bytes):
//! `messageId (32) | recipient (20) | amount (32) | sourceChainId (32) | destinationChainId (32)`,
//! hashed with keccak256. The digest is signed as an EIP-191 personal message
//! so the destination contract can `ecrecover` the relayer address.

use crate::config::WalletConfig;
use crate::error::{RelayerError, RelayerResult};
use crate::transfer::{MessageId, Transfer};

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, Bytes, RecoveryMessage, Signature, H256, U256};
use ethers::utils::hash_message;
use sha3::{Digest, Keccak256};
use tracing::{error, info, warn};

const DEFAULT_KEY_ENVS: &[&str] = &["RELAYER_PRIVATE_KEY", "PRIVATE_KEY"];

/// The parameters the destination contract re-derives before accepting a completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttestationParams {
    pub message_id: MessageId,
    pub recipient: Address,
    pub amount: U256,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
}

impl From<&Transfer> for AttestationParams {
    fn from(transfer: &Transfer) -> Self {
        Self {
            message_id: transfer.message_id,
            recipient: transfer.recipient,
            amount: transfer.amount,
            source_chain_id: transfer.source_chain_id,
            destination_chain_id: transfer.destination_chain_id,
        }
    }
}

impl AttestationParams {
    /// Canonical packed encoding
    pub fn encode_packed(&self) -> [u8; 148] {
        let mut data = [0u8; 148];
        data[0..32].copy_from_slice(self.message_id.as_bytes());
        data[32..52].copy_from_slice(self.recipient.as_bytes());
        self.amount.to_big_endian(&mut data[52..84]);
        U256::from(self.source_chain_id).to_big_endian(&mut data[84..116]);
        U256::from(self.destination_chain_id).to_big_endian(&mut data[116..148]);
        data
    }

    /// keccak256 of the packed encoding
    pub fn digest(&self) -> H256 {
        let mut hasher = Keccak256::new();
        hasher.update(self.encode_packed());
        H256::from_slice(&hasher.finalize())
    }
}

/// A relayer signature, recoverable to the signing address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attestation {
    pub digest: H256,
    pub signature: Signature,
}

impl Attestation {
    /// 65-byte `r || s || v` form passed to `completeTransfer`
    pub fn to_bytes(&self) -> Bytes {
        Bytes::from(self.signature.to_vec())
    }

    pub fn recover(&self) -> RelayerResult<Address> {
        self.signature
            .recover(RecoveryMessage::Hash(hash_message(self.digest)))
            .map_err(|e| RelayerError::Signing(e.to_string()))
    }
}

/// Holds the single relayer key in memory
#[derive(Debug, Clone)]
pub struct AttestationSigner {
    wallet: LocalWallet,
}

impl AttestationSigner {
    pub fn new(wallet: LocalWallet) -> Self {
        Self { wallet }
    }

    pub fn from_private_key(key: &str) -> RelayerResult<Self> {
        key.trim()
            .parse::<LocalWallet>()
            .map(Self::new)
            .map_err(|e| RelayerError::Config(format!("Invalid relayer private key: {}", e)))
    }

    /// Load the key from the environment. `None` puts the service in status-only mode.
    pub fn from_env(config: &WalletConfig) -> Option<Self> {
        let key = config
            .private_key_env
            .iter()
            .map(String::as_str)
            .chain(DEFAULT_KEY_ENVS.iter().copied())
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()));

        let Some(key) = key else {
            warn!("No relayer private key configured - bridge will be read-only");
            return None;
        };

        match Self::from_private_key(&key) {
            Ok(signer) => {
                info!("Relayer wallet initialized: {:?}", signer.address());
                Some(signer)
            }
            Err(e) => {
                error!("{} - bridge will be read-only", e);
                None
            }
        }
    }

    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Wallet used to sign the completion transaction itself
    pub fn wallet(&self) -> &LocalWallet {
        &self.wallet
    }

    /// Sign the canonical digest of `params`. Deterministic (RFC 6979 nonces).
    pub fn sign(&self, params: &AttestationParams) -> RelayerResult<Attestation> {
        let digest = params.digest();
        let signature = self
            .wallet
            .sign_hash(hash_message(digest))
            .map_err(|e| RelayerError::Signing(e.to_string()))?;

        Ok(Attestation { digest, signature })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

    fn params() -> AttestationParams {
        AttestationParams {
            message_id: H256::repeat_byte(0x11),
            recipient: Address::repeat_byte(0x22),
            amount: U256::exp10(18),
            source_chain_id: 137,
            destination_chain_id: 42161,
        }
    }

    #[test]
    fn test_packed_layout() {
        let packed = params().encode_packed();
        assert_eq!(&packed[0..32], &[0x11; 32]);
        assert_eq!(&packed[32..52], &[0x22; 20]);
        assert_eq!(packed[115], 137);
        assert_eq!(&packed[144..148], &42161u32.to_be_bytes());
    }

    #[test]
    fn test_sign_is_deterministic_and_recovers() {
        let signer = AttestationSigner::from_private_key(TEST_KEY).unwrap();

        let first = signer.sign(&params()).unwrap();
        let second = signer.sign(&params()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.to_bytes().len(), 65);
        assert_eq!(first.recover().unwrap(), signer.address());
        assert_eq!(second.recover().unwrap(), signer.address());
    }

    #[test]
    fn test_any_parameter_changes_digest() {
        let base = params();
        let variants = [
            AttestationParams { amount: U256::exp10(18) + 1, ..base },
            AttestationParams { source_chain_id: 80002, ..base },
            AttestationParams { destination_chain_id: 324, ..base },
            AttestationParams { recipient: Address::repeat_byte(0x23), ..base },
            AttestationParams { message_id: H256::repeat_byte(0x12), ..base },
        ];
        for variant in variants {
            assert_ne!(variant.digest(), base.digest());
        }
    }

    #[test]
    fn test_invalid_key_is_configuration_error() {
        assert!(matches!(
            AttestationSigner::from_private_key("not-a-key"),
            Err(RelayerError::Config(_))
        ));
    }
}
