//! Signer Port - Local Digest Signing
//!
//! Only the output of key derivation is consumed here: an address and the
//! ability to sign a 32-byte hash. No network call is ever made to sign.

use alloy::primitives::{Address, B256};
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while signing.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SignerError {
  /// The key rejected the digest or is unavailable.
  #[error("signing failed: {0}")]
  Failed(String),
}

/// Trait for signers of raw 32-byte digests.
#[async_trait]
pub trait HashSigner: Send + Sync + 'static {
  /// EVM address of the key.
  fn address(&self) -> Address;

  /// Sign `hash` without any prefix; returns `r ‖ s ‖ v`.
  async fn sign_hash(&self, hash: &B256) -> Result<[u8; 65], SignerError>;
}
