//! Chain Adapter Port - One Interface over Every Chain Family
//!
//! The submitter, poller and multisig engine only ever see this trait.
//! EVM chains are reached over JSON-RPC, TRON over its REST+JSON API; the
//! difference is resolved once inside each adapter and never inspected
//! deeper in the pipeline.

use alloy::primitives::{Address, Bytes, U256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::rpc::RpcError;
use crate::domain::fees::{FeeData, FeeOverrides};

/// Chain family behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainFamily {
  /// Ethereum-compatible, JSON-RPC.
  Evm,
  /// TRON, REST+JSON.
  Tron,
}

impl std::fmt::Display for ChainFamily {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Self::Evm => write!(f, "evm"),
      Self::Tron => write!(f, "tron"),
    }
  }
}

/// Errors at the adapter boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
  /// Network-level failure; retrying may help.
  #[error("network error: {0}")]
  Transport(String),
  /// The node refused the request (reverts, nonce errors, underpriced...).
  #[error("{0}")]
  Rejected(String),
  /// Unexpected response shape.
  #[error("decode error: {0}")]
  Decode(String),
  /// Local signing failed.
  #[error("signer error: {0}")]
  Signer(String),
  /// Operation not available on this chain family.
  #[error("unsupported on this chain: {0}")]
  Unsupported(&'static str),
}

impl ChainError {
  /// Whether the failure is a transient network condition.
  pub const fn is_transient(&self) -> bool {
    matches!(self, Self::Transport(_))
  }
}

impl From<RpcError> for ChainError {
  fn from(err: RpcError) -> Self {
    match err {
      RpcError::Transport(msg) => Self::Transport(msg),
      RpcError::Server { message, .. } => Self::Rejected(message),
      RpcError::Decode(msg) => Self::Decode(msg),
    }
  }
}

/// An outgoing transaction, before signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
  /// Sender account (hex for EVM, base58 for TRON).
  pub from: String,
  /// Recipient or contract.
  pub to: String,
  /// Amount in the chain's base unit (wei / sun).
  pub value: U256,
  /// Calldata; empty for plain transfers.
  pub data: Bytes,
  /// Mirrored nonce; `None` lets the adapter pick the pending count.
  pub nonce: Option<u64>,
  /// Fee pricing and gas limit.
  pub overrides: FeeOverrides,
}

/// A read-only contract call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractCall {
  /// Contract address.
  pub to: String,
  /// ABI-encoded calldata.
  pub data: Bytes,
}

/// Definitive outcome of an included transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiptStatus {
  /// Whether execution succeeded.
  pub success: bool,
  /// Chain-reported failure reason, if any.
  pub error: Option<String>,
}

impl ReceiptStatus {
  /// Successful inclusion.
  pub const fn success() -> Self {
    Self {
      success: true,
      error: None,
    }
  }

  /// Reverted / failed inclusion.
  pub fn failure(error: impl Into<String>) -> Self {
    Self {
      success: false,
      error: Some(error.into()),
    }
  }
}

/// Trait for chain adapters.
///
/// Implementors hold their own transport and signing capability; callers
/// only pass plain requests and get back hashes and statuses.
#[async_trait]
pub trait ChainAdapter: Send + Sync + 'static {
  /// Chain family of this adapter.
  fn family(&self) -> ChainFamily;

  /// Numeric chain id.
  fn chain_id(&self) -> u64;

  /// Identity of the underlying provider (URL), used to key fee caches.
  fn provider_id(&self) -> String;

  /// `address` in this chain's account notation (hex, or base58 on TRON).
  fn account_address(&self, address: &Address) -> String;

  /// Pending-inclusive transaction count for `account`.
  ///
  /// `Ok(None)` when the chain family has no account sequence (TRON).
  async fn get_nonce(&self, account: &str) -> Result<Option<u64>, ChainError>;

  /// Native balance of `account`.
  async fn get_balance(&self, account: &str) -> Result<U256, ChainError>;

  /// Current fee parameters.
  async fn get_fee_data(&self) -> Result<FeeData, ChainError>;

  /// Sign and broadcast; returns the transaction hash.
  async fn send_transaction(&self, request: &SendRequest) -> Result<String, ChainError>;

  /// Receipt for `hash`; `Ok(None)` while not yet definitive.
  async fn get_receipt(&self, hash: &str) -> Result<Option<ReceiptStatus>, ChainError>;

  /// Several read-only calls in one round trip, results in call order.
  async fn call_batch(&self, calls: &[ContractCall]) -> Result<Vec<Bytes>, ChainError>;

  /// Whether the node is reachable.
  async fn is_healthy(&self) -> bool;

  /// Drop cached node responses (provider replacement).
  async fn clear_cache(&self) {}
}
