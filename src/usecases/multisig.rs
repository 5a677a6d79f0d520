//! Multisig Engine Use Case - Safe Quorum Execution
//!
//! Proposal lifecycle:
//! 1. Read `(nonce, owners, threshold)` of the Safe in one batched call
//! 2. Check the local signer is a current owner
//! 3. Hash (EIP-712) and sign locally
//! 4. Threshold 1: broadcast `execTransaction` at once (flash execution)
//! 5. Otherwise: keep the proposal pending until enough owners co-sign
//!
//! Only one proposal build may run per Safe at a time; a second attempt
//! while one is building fails fast with `ProposalInFlight`.
//!
//! The flash path checks ownership and threshold before signing and does
//! not re-read them before broadcast. An owner change landing in between
//! makes the Safe revert the call; it is surfaced as a broadcast failure.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, PoisonError};

use alloy::primitives::{Address, B256, Bytes, U256};
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::submitter::{Submitter, TxDraft};
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::error::TxError;
use crate::domain::safe::{
  PendingSafeTransaction, SENTINEL_OWNERS, SafeCall, SafeDetails, concat_signatures, details_calls,
  encode_add_owner, encode_change_threshold, encode_exec_transaction, encode_remove_owner,
  normalize_signature, ordered_owner_signatures, prev_owner, safe_tx_hash,
};
use crate::domain::transaction::{SendResult, now_ms};
use crate::ports::chain::{ChainAdapter, ChainError, ContractCall};
use crate::ports::signer::HashSigner;

type SafeKey = (u64, Address);

/// Result of a propose call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalReceipt {
  /// User-facing outcome; carries the hash when executed immediately.
  pub outcome: SendResult,
  /// Id of the pending proposal, when one was queued.
  pub proposal_id: Option<String>,
}

impl ProposalReceipt {
  fn executed(hash: String) -> Self {
    Self {
      outcome: SendResult::ok(hash),
      proposal_id: None,
    }
  }

  fn queued(id: String) -> Self {
    Self {
      outcome: SendResult::accepted(),
      proposal_id: Some(id),
    }
  }

  fn failed(err: TxError) -> Self {
    Self {
      outcome: err.into(),
      proposal_id: None,
    }
  }
}

enum Proposed {
  Executed(String),
  Queued(String),
}

/// Marks a Safe as "building" until dropped.
struct BuildGuard<'a> {
  building: &'a std::sync::Mutex<HashSet<SafeKey>>,
  key: SafeKey,
}

impl<'a> BuildGuard<'a> {
  fn acquire(building: &'a std::sync::Mutex<HashSet<SafeKey>>, key: SafeKey) -> Result<Self, TxError> {
    let inserted = building
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .insert(key);
    if !inserted {
      return Err(TxError::ProposalInFlight(key.1));
    }
    Ok(Self { building, key })
  }
}

impl Drop for BuildGuard<'_> {
  fn drop(&mut self) {
    self
      .building
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .remove(&self.key);
  }
}

/// Proposes, co-signs and executes Safe transactions.
pub struct MultisigEngine {
  submitter: Arc<Submitter>,
  pending: RwLock<BTreeMap<String, PendingSafeTransaction>>,
  building: std::sync::Mutex<HashSet<SafeKey>>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl MultisigEngine {
  /// Create an engine broadcasting through `submitter`.
  pub fn new(submitter: Arc<Submitter>) -> Self {
    Self {
      submitter,
      pending: RwLock::new(BTreeMap::new()),
      building: std::sync::Mutex::new(HashSet::new()),
      metrics: None,
    }
  }

  /// Count actions by outcome.
  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Current owners, threshold and nonce of `safe`.
  pub async fn details(&self, adapter: &Arc<dyn ChainAdapter>, safe: Address) -> Result<SafeDetails, TxError> {
    read_details(adapter, safe).await
  }

  /// Propose `call` from `safe`.
  ///
  /// Executes immediately on a threshold-1 Safe, otherwise queues a
  /// proposal carrying the signer's signature.
  pub async fn propose(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    signer: &dyn HashSigner,
    safe: Address,
    call: SafeCall,
    summary: impl Into<String>,
  ) -> ProposalReceipt {
    let result = self
      .try_propose(adapter, signer, safe, summary.into(), move |_| Ok(call))
      .await;
    self.finish_proposal("propose", result)
  }

  /// Propose adding `owner` with a new `threshold`.
  pub async fn add_owner(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    signer: &dyn HashSigner,
    safe: Address,
    owner: Address,
    threshold: u64,
  ) -> ProposalReceipt {
    let summary = format!("Add owner {owner} (threshold {threshold})");
    let result = self
      .try_propose(adapter, signer, safe, summary, move |details| {
        if owner == Address::ZERO || owner == SENTINEL_OWNERS || owner == safe {
          return Err(TxError::InvalidOwnerChange(format!("{owner} cannot be an owner")));
        }
        if details.is_owner(&owner) {
          return Err(TxError::InvalidOwnerChange(format!("{owner} is already an owner")));
        }
        check_threshold(threshold, details.owners.len() + 1)?;
        Ok(self_call(safe, encode_add_owner(owner, threshold)))
      })
      .await;
    self.finish_proposal("add_owner", result)
  }

  /// Propose removing `owner` with a new `threshold`.
  pub async fn remove_owner(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    signer: &dyn HashSigner,
    safe: Address,
    owner: Address,
    threshold: u64,
  ) -> ProposalReceipt {
    let summary = format!("Remove owner {owner} (threshold {threshold})");
    let result = self
      .try_propose(adapter, signer, safe, summary, move |details| {
        let prev = prev_owner(&details.owners, &owner)
          .ok_or_else(|| TxError::InvalidOwnerChange(format!("{owner} is not an owner")))?;
        check_threshold(threshold, details.owners.len() - 1)?;
        Ok(self_call(safe, encode_remove_owner(prev, owner, threshold)))
      })
      .await;
    self.finish_proposal("remove_owner", result)
  }

  /// Propose a new `threshold`.
  pub async fn change_threshold(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    signer: &dyn HashSigner,
    safe: Address,
    threshold: u64,
  ) -> ProposalReceipt {
    let summary = format!("Change threshold to {threshold}");
    let result = self
      .try_propose(adapter, signer, safe, summary, move |details| {
        check_threshold(threshold, details.owners.len())?;
        Ok(self_call(safe, encode_change_threshold(threshold)))
      })
      .await;
    self.finish_proposal("change_threshold", result)
  }

  #[instrument(skip(self, adapter, signer, summary, build), fields(chain_id = adapter.chain_id()))]
  async fn try_propose<F>(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    signer: &dyn HashSigner,
    safe: Address,
    summary: String,
    build: F,
  ) -> Result<Proposed, TxError>
  where
    F: FnOnce(&SafeDetails) -> Result<SafeCall, TxError> + Send,
  {
    let chain_id = adapter.chain_id();
    let _building = BuildGuard::acquire(&self.building, (chain_id, safe))?;

    let details = read_details(adapter, safe).await?;
    let owner = signer.address();
    if !details.is_owner(&owner) {
      return Err(TxError::OwnershipDenied(owner));
    }
    let call = build(&details)?;

    if details.threshold <= 1 {
      let hash = safe_tx_hash(chain_id, safe, &call, details.nonce);
      let signature = sign(signer, &hash).await?;
      let signatures = BTreeMap::from([(owner, signature)]);
      let blob = concat_signatures(&ordered_owner_signatures(&signatures, &details.owners));

      let tx_hash = self
        .broadcast_exec(adapter, owner, safe, &call, blob, summary)
        .await?;
      info!(hash = %tx_hash, nonce = details.nonce, "Safe transaction executed");
      return Ok(Proposed::Executed(tx_hash));
    }

    let nonce = self.next_nonce(chain_id, safe, details.nonce).await;
    let hash = safe_tx_hash(chain_id, safe, &call, nonce);
    let signature = sign(signer, &hash).await?;

    let proposal = PendingSafeTransaction {
      id: Uuid::new_v4().to_string(),
      safe,
      chain_id,
      to: call.to,
      value: call.value,
      data: call.data,
      nonce,
      safe_tx_hash: hash,
      signatures: BTreeMap::from([(owner, signature)]),
      summary,
      created_at: now_ms(),
    };
    let id = proposal.id.clone();
    self.pending.write().await.insert(id.clone(), proposal);

    info!(
      id = %id,
      nonce,
      threshold = details.threshold,
      "Safe proposal queued for signatures"
    );
    Ok(Proposed::Queued(id))
  }

  /// Add `signer`'s signature to a pending proposal.
  #[instrument(skip(self, adapter, signer), fields(chain_id = adapter.chain_id()))]
  pub async fn co_sign(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    signer: &dyn HashSigner,
    proposal_id: &str,
  ) -> SendResult {
    let result = self.try_co_sign(adapter, signer, proposal_id).await;
    self.finish("co_sign", "signed", result.map(|()| SendResult::accepted()))
  }

  async fn try_co_sign(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    signer: &dyn HashSigner,
    proposal_id: &str,
  ) -> Result<(), TxError> {
    let proposal = self.pending_on(adapter, proposal_id).await?;
    let details = read_details(adapter, proposal.safe).await?;
    let owner = signer.address();
    if !details.is_owner(&owner) {
      return Err(TxError::OwnershipDenied(owner));
    }
    if proposal.nonce < details.nonce {
      return Err(TxError::StaleProposal {
        proposal: proposal.nonce,
        current: details.nonce,
      });
    }

    let signature = sign(signer, &proposal.safe_tx_hash).await?;
    let mut pending = self.pending.write().await;
    let entry = pending
      .get_mut(proposal_id)
      .ok_or_else(|| TxError::ProposalNotFound(proposal_id.to_string()))?;
    entry.signatures.insert(owner, signature);
    info!(id = proposal_id, owner = %owner, signatures = entry.signatures.len(), "Proposal co-signed");
    Ok(())
  }

  /// Broadcast a pending proposal once it has quorum.
  ///
  /// Only signatures of current owners count. On failure the proposal
  /// stays pending for a retry.
  #[instrument(skip(self, adapter, executor), fields(chain_id = adapter.chain_id()))]
  pub async fn execute(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    executor: &dyn HashSigner,
    proposal_id: &str,
  ) -> SendResult {
    let result = self.try_execute(adapter, executor, proposal_id).await;
    self.finish("execute", "executed", result.map(SendResult::ok))
  }

  async fn try_execute(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    executor: &dyn HashSigner,
    proposal_id: &str,
  ) -> Result<String, TxError> {
    let proposal = self.pending_on(adapter, proposal_id).await?;
    let details = read_details(adapter, proposal.safe).await?;

    if proposal.nonce < details.nonce {
      return Err(TxError::StaleProposal {
        proposal: proposal.nonce,
        current: details.nonce,
      });
    }
    if proposal.nonce > details.nonce {
      return Err(TxError::NotReady(format!(
        "Safe nonce is {}; earlier proposals must execute first",
        details.nonce
      )));
    }

    let ordered = ordered_owner_signatures(&proposal.signatures, &details.owners);
    let need = usize::try_from(details.threshold).unwrap_or(usize::MAX);
    if ordered.len() < need {
      return Err(TxError::QuorumInsufficient {
        have: ordered.len(),
        need,
      });
    }

    let hash = self
      .broadcast_exec(
        adapter,
        executor.address(),
        proposal.safe,
        &proposal.call(),
        concat_signatures(&ordered),
        proposal.summary.clone(),
      )
      .await?;

    self.pending.write().await.remove(proposal_id);
    info!(id = proposal_id, hash = %hash, signatures = ordered.len(), "Safe proposal executed");
    Ok(hash)
  }

  /// Drop a pending proposal. Returns whether it existed.
  pub async fn discard(&self, proposal_id: &str) -> bool {
    let removed = self.pending.write().await.remove(proposal_id).is_some();
    if removed {
      info!(id = proposal_id, "Proposal discarded");
      self.count("discard", "discarded");
    }
    removed
  }

  /// One pending proposal.
  pub async fn proposal(&self, proposal_id: &str) -> Option<PendingSafeTransaction> {
    self.pending.read().await.get(proposal_id).cloned()
  }

  /// Pending proposals of `safe` on `chain_id`, lowest nonce first.
  pub async fn pending(&self, chain_id: u64, safe: Address) -> Vec<PendingSafeTransaction> {
    let mut proposals: Vec<_> = self
      .pending
      .read()
      .await
      .values()
      .filter(|p| p.chain_id == chain_id && p.safe == safe)
      .cloned()
      .collect();
    proposals.sort_by_key(|p| (p.nonce, p.created_at));
    proposals
  }

  /// Every pending proposal, for the persistence layer.
  pub async fn pending_snapshot(&self) -> Vec<PendingSafeTransaction> {
    self.pending.read().await.values().cloned().collect()
  }

  /// Replace the pending set with persisted proposals.
  pub async fn restore_pending(&self, proposals: Vec<PendingSafeTransaction>) {
    *self.pending.write().await = proposals.into_iter().map(|p| (p.id.clone(), p)).collect();
  }

  async fn pending_on(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    proposal_id: &str,
  ) -> Result<PendingSafeTransaction, TxError> {
    let proposal = self
      .proposal(proposal_id)
      .await
      .ok_or_else(|| TxError::ProposalNotFound(proposal_id.to_string()))?;
    if proposal.chain_id != adapter.chain_id() {
      return Err(TxError::NotReady(format!(
        "proposal belongs to chain {}",
        proposal.chain_id
      )));
    }
    Ok(proposal)
  }

  async fn next_nonce(&self, chain_id: u64, safe: Address, on_chain: u64) -> u64 {
    self
      .pending
      .read()
      .await
      .values()
      .filter(|p| p.chain_id == chain_id && p.safe == safe)
      .map(|p| p.nonce + 1)
      .fold(on_chain, u64::max)
  }

  async fn broadcast_exec(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    sender: Address,
    safe: Address,
    call: &SafeCall,
    signatures: Bytes,
    summary: String,
  ) -> Result<String, TxError> {
    let account = adapter.account_address(&sender);
    let draft = TxDraft::call(
      adapter.account_address(&safe),
      encode_exec_transaction(call, signatures),
      summary,
    );
    self.submitter.try_submit(adapter, &account, draft).await
  }

  fn finish_proposal(&self, action: &str, result: Result<Proposed, TxError>) -> ProposalReceipt {
    match result {
      Ok(Proposed::Executed(hash)) => {
        self.count(action, "executed");
        ProposalReceipt::executed(hash)
      }
      Ok(Proposed::Queued(id)) => {
        self.count(action, "queued");
        ProposalReceipt::queued(id)
      }
      Err(e) => {
        warn!(action, error = %e, "Safe proposal failed");
        self.count(action, "failed");
        ProposalReceipt::failed(e)
      }
    }
  }

  fn finish(&self, action: &str, outcome: &str, result: Result<SendResult, TxError>) -> SendResult {
    match result {
      Ok(result) => {
        self.count(action, outcome);
        result
      }
      Err(e) => {
        warn!(action, error = %e, "Safe action failed");
        self.count(action, "failed");
        e.into()
      }
    }
  }

  fn count(&self, action: &str, outcome: &str) {
    if let Some(metrics) = &self.metrics {
      metrics.safe_actions.with_label_values(&[action, outcome]).inc();
    }
  }
}

async fn read_details(adapter: &Arc<dyn ChainAdapter>, safe: Address) -> Result<SafeDetails, TxError> {
  let to = adapter.account_address(&safe);
  let calls: Vec<ContractCall> = details_calls()
    .into_iter()
    .map(|data| ContractCall { to: to.clone(), data })
    .collect();

  let results = adapter.call_batch(&calls).await.map_err(read_error)?;
  let [nonce, owners, threshold] = results.as_slice() else {
    return Err(TxError::NotReady(format!(
      "expected 3 Safe reads, got {}",
      results.len()
    )));
  };
  SafeDetails::decode(nonce, owners, threshold)
    .map_err(|e| TxError::NotReady(format!("{safe} is not a readable Safe: {e}")))
}

fn read_error(err: ChainError) -> TxError {
  if err.is_transient() {
    TxError::TransientNetwork(err.to_string())
  } else {
    TxError::NotReady(format!("cannot read Safe state: {err}"))
  }
}

async fn sign(signer: &dyn HashSigner, hash: &B256) -> Result<Bytes, TxError> {
  signer
    .sign_hash(hash)
    .await
    .map(normalize_signature)
    .map_err(|e| TxError::NotReady(e.to_string()))
}

fn check_threshold(threshold: u64, owners: usize) -> Result<(), TxError> {
  let owners = owners as u64;
  if threshold == 0 || threshold > owners {
    return Err(TxError::InvalidOwnerChange(format!(
      "threshold {threshold} must be between 1 and {owners}"
    )));
  }
  Ok(())
}

/// A call from the Safe to itself (owner management).
fn self_call(safe: Address, data: Bytes) -> SafeCall {
  SafeCall {
    to: safe,
    value: U256::ZERO,
    data,
  }
}
