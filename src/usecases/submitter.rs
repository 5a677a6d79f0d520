//! Submitter Use Case - Nonce-mirrored Transaction Submission
//!
//! Turns a send intent into a broadcast transaction:
//! 1. Lock the nonce mirror of (account, chain) and sync it if unset
//! 2. Price the transaction from the fee source
//! 3. Sign and broadcast through the chain adapter
//! 4. On success advance the mirror and append a `submitted` record
//!
//! A rejection mentioning a nonce or replacement conflict resets the
//! mirror so the next attempt re-syncs from the network. TRON has no
//! account nonce and skips the mirror entirely.

use std::sync::Arc;

use alloy::primitives::{Bytes, U256};
use tracing::{info, instrument, warn};

use super::ledger::TransactionLedger;
use super::nonce_mirror::NonceMirror;
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::error::{TxError, is_nonce_conflict};
use crate::domain::transaction::{SendResult, TransactionRecord};
use crate::ports::chain::{ChainAdapter, ChainError, ChainFamily, SendRequest};
use crate::ports::fees::FeeSource;

/// A transaction to send, before nonce and fee assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxDraft {
  /// Recipient or contract.
  pub to: String,
  /// Amount in the chain's base unit.
  pub value: U256,
  /// Calldata; empty for plain transfers.
  pub data: Bytes,
  /// Gas limit; estimated by the adapter when absent.
  pub gas_limit: Option<u64>,
  /// Human summary stored on the record.
  pub summary: String,
}

impl TxDraft {
  /// A plain value transfer.
  pub fn transfer(to: impl Into<String>, value: U256, summary: impl Into<String>) -> Self {
    Self {
      to: to.into(),
      value,
      data: Bytes::new(),
      gas_limit: None,
      summary: summary.into(),
    }
  }

  /// A contract call without value.
  pub fn call(to: impl Into<String>, data: Bytes, summary: impl Into<String>) -> Self {
    Self {
      to: to.into(),
      value: U256::ZERO,
      data,
      gas_limit: None,
      summary: summary.into(),
    }
  }
}

/// Broadcasts externally-owned-account transactions.
pub struct Submitter {
  ledger: Arc<TransactionLedger>,
  mirror: Arc<NonceMirror>,
  fees: Arc<dyn FeeSource>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl Submitter {
  /// Create a submitter.
  pub fn new(
    ledger: Arc<TransactionLedger>,
    mirror: Arc<NonceMirror>,
    fees: Arc<dyn FeeSource>,
  ) -> Self {
    Self {
      ledger,
      mirror,
      fees,
      metrics: None,
    }
  }

  /// Count successful broadcasts.
  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// The nonce mirror shared with the session.
  pub fn mirror(&self) -> &Arc<NonceMirror> {
    &self.mirror
  }

  /// Submit `draft` from `account`; never returns an error.
  pub async fn submit(&self, adapter: &Arc<dyn ChainAdapter>, account: &str, draft: TxDraft) -> SendResult {
    match self.try_submit(adapter, account, draft).await {
      Ok(hash) => SendResult::ok(hash),
      Err(e) => e.into(),
    }
  }

  /// Submit `draft` from `account`, returning the hash.
  #[instrument(skip(self, adapter, draft), fields(chain_id = adapter.chain_id()))]
  pub async fn try_submit(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    account: &str,
    draft: TxDraft,
  ) -> Result<String, TxError> {
    if account.is_empty() {
      return Err(TxError::NotReady("no active account".into()));
    }

    if adapter.family() == ChainFamily::Tron {
      return self.broadcast(adapter, account, draft, None).await;
    }

    let mut guard = self.mirror.lock(account, adapter.chain_id()).await;
    if guard.value().is_none() {
      if let Err(e) = guard.sync(adapter).await {
        // Proceed without a nonce; the adapter falls back to the pending count.
        warn!(error = %e, "Nonce sync failed, letting the adapter pick the nonce");
      }
    }
    let nonce = guard.value();

    match self.broadcast(adapter, account, draft, nonce).await {
      Ok(hash) => {
        guard.advance();
        Ok(hash)
      }
      Err(e) => {
        if matches!(e, TxError::NonceConflict(_)) {
          guard.invalidate();
          warn!(nonce = ?nonce, "Nonce conflict, mirror reset");
        }
        Err(e)
      }
    }
  }

  async fn broadcast(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    account: &str,
    draft: TxDraft,
    nonce: Option<u64>,
  ) -> Result<String, TxError> {
    let chain_id = adapter.chain_id();
    let overrides = self.fees.overrides(adapter, draft.gas_limit).await;

    let request = SendRequest {
      from: account.to_string(),
      to: draft.to,
      value: draft.value,
      data: draft.data,
      nonce,
      overrides,
    };

    match adapter.send_transaction(&request).await {
      Ok(hash) => {
        info!(hash = %hash, nonce = ?nonce, "Transaction submitted");
        self
          .ledger
          .append(TransactionRecord::submitted(chain_id, hash.clone(), draft.summary))
          .await;
        if let Some(metrics) = &self.metrics {
          let chain = chain_id.to_string();
          metrics.tx_submitted.with_label_values(&[chain.as_str()]).inc();
        }
        Ok(hash)
      }
      Err(e) => {
        let error = classify_send_error(e);
        // The request never left the process; there is no attempt to record.
        if !matches!(error, TxError::NotReady(_)) {
          self
            .ledger
            .append(TransactionRecord::rejected(chain_id, draft.summary, &error.to_string()))
            .await;
        }
        warn!(error = %error, "Broadcast failed");
        Err(error)
      }
    }
  }
}

/// Map an adapter failure onto the user-facing taxonomy.
pub fn classify_send_error(err: ChainError) -> TxError {
  match err {
    ChainError::Signer(msg) => TxError::NotReady(format!("signer unavailable: {msg}")),
    ChainError::Unsupported(what) => TxError::NotReady(what.to_string()),
    // Providers report conflicts through HTTP status bodies and odd
    // payloads as well as JSON-RPC errors; the text decides.
    ChainError::Rejected(msg) | ChainError::Transport(msg) | ChainError::Decode(msg)
      if is_nonce_conflict(&msg) =>
    {
      TxError::NonceConflict(msg)
    }
    ChainError::Rejected(msg) => TxError::BroadcastRejected(msg),
    ChainError::Transport(msg) => TxError::TransientNetwork(msg),
    ChainError::Decode(msg) => TxError::BroadcastRejected(msg),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_classify_send_error() {
    assert_eq!(
      classify_send_error(ChainError::Rejected("nonce too low".into())),
      TxError::NonceConflict("nonce too low".into())
    );
    assert_eq!(
      classify_send_error(ChainError::Rejected("replacement transaction underpriced".into())),
      TxError::NonceConflict("replacement transaction underpriced".into())
    );
    assert_eq!(
      classify_send_error(ChainError::Rejected("execution reverted".into())),
      TxError::BroadcastRejected("execution reverted".into())
    );
    assert!(matches!(
      classify_send_error(ChainError::Signer("locked".into())),
      TxError::NotReady(_)
    ));
  }

  #[test]
  fn test_nonce_conflict_recognised_in_every_variant() {
    let body = r#"HTTP 400 Bad Request: {"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"nonce too low"}}"#;
    assert_eq!(
      classify_send_error(ChainError::Transport(body.into())),
      TxError::NonceConflict(body.into())
    );
    assert!(matches!(
      classify_send_error(ChainError::Decode("unexpected reply: replacement fee too low".into())),
      TxError::NonceConflict(_)
    ));
    assert!(matches!(
      classify_send_error(ChainError::Transport("connection reset".into())),
      TxError::TransientNetwork(_)
    ));
  }

  #[test]
  fn test_draft_constructors() {
    let transfer = TxDraft::transfer("0xabc", U256::from(5u64), "Send");
    assert!(transfer.data.is_empty());
    let call = TxDraft::call("0xabc", Bytes::from(vec![1, 2]), "Call");
    assert_eq!(call.value, U256::ZERO);
  }
}
