//! Nonce Mirror Use Case - Local "Next Nonce" per (Account, Chain)
//!
//! State machine per key: `Unset → Syncing → Set(n)`, advanced by one after
//! each successful broadcast and reset to `Unset` on any nonce conflict,
//! account switch, chain switch or provider replacement.
//!
//! Each key has its own async mutex. A submission holds the guard from the
//! nonce read until the mirror is advanced, so two in-flight submissions
//! for the same key can never use the same value.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::error::TxError;
use crate::ports::chain::ChainAdapter;

/// Mirror state for one (account, chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceState {
  /// Unknown; the next submission syncs from the network.
  Unset,
  /// A sync is in progress.
  Syncing,
  /// The nonce the next submission will use.
  Set(u64),
}

/// Retry policy for nonce syncs.
#[derive(Debug, Clone, Copy)]
pub struct SyncPolicy {
  /// Total attempts, including the first.
  pub attempts: u32,
  /// Delay before the first retry; doubled each time.
  pub backoff: Duration,
}

impl Default for SyncPolicy {
  fn default() -> Self {
    Self {
      attempts: 3,
      backoff: Duration::from_millis(250),
    }
  }
}

type NonceKey = (String, u64);

/// Per-key nonce mirrors.
pub struct NonceMirror {
  slots: Mutex<HashMap<NonceKey, Arc<Mutex<NonceState>>>>,
  policy: SyncPolicy,
  metrics: Option<Arc<MetricsRegistry>>,
}

/// Exclusive access to one mirror for the duration of a submission.
pub struct NonceGuard {
  state: OwnedMutexGuard<NonceState>,
  account: String,
  chain_id: u64,
  policy: SyncPolicy,
  metrics: Option<Arc<MetricsRegistry>>,
}

fn key(account: &str, chain_id: u64) -> NonceKey {
  (account.to_ascii_lowercase(), chain_id)
}

impl NonceMirror {
  /// Create an empty mirror set.
  pub fn new(policy: SyncPolicy) -> Self {
    Self {
      slots: Mutex::new(HashMap::new()),
      policy,
      metrics: None,
    }
  }

  /// Count network syncs.
  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  async fn slot(&self, account: &str, chain_id: u64) -> Arc<Mutex<NonceState>> {
    let mut slots = self.slots.lock().await;
    Arc::clone(
      slots
        .entry(key(account, chain_id))
        .or_insert_with(|| Arc::new(Mutex::new(NonceState::Unset))),
    )
  }

  /// Wait for exclusive access to the mirror of (`account`, `chain_id`).
  pub async fn lock(&self, account: &str, chain_id: u64) -> NonceGuard {
    let state = self.slot(account, chain_id).await.lock_owned().await;
    NonceGuard {
      state,
      account: account.to_string(),
      chain_id,
      policy: self.policy,
      metrics: self.metrics.clone(),
    }
  }

  /// Current mirrored value, if set.
  pub async fn current(&self, account: &str, chain_id: u64) -> Option<u64> {
    match *self.slot(account, chain_id).await.lock().await {
      NonceState::Set(nonce) => Some(nonce),
      _ => None,
    }
  }

  /// Sync the mirror if unset (no-op when already set).
  pub async fn sync(
    &self,
    adapter: &Arc<dyn ChainAdapter>,
    account: &str,
  ) -> Result<Option<u64>, TxError> {
    self.lock(account, adapter.chain_id()).await.sync(adapter).await
  }

  /// Reset one mirror to `Unset`.
  pub async fn invalidate(&self, account: &str, chain_id: u64) {
    self.lock(account, chain_id).await.invalidate();
  }

  /// Reset every mirror (account switch, provider replacement).
  pub async fn invalidate_all(&self) {
    let slots: Vec<Arc<Mutex<NonceState>>> = self.slots.lock().await.values().cloned().collect();
    for slot in slots {
      *slot.lock().await = NonceState::Unset;
    }
    debug!("All nonce mirrors invalidated");
  }

  /// Reset every mirror of one chain (chain switch).
  pub async fn invalidate_chain(&self, chain_id: u64) {
    let slots: Vec<Arc<Mutex<NonceState>>> = self
      .slots
      .lock()
      .await
      .iter()
      .filter(|((_, chain), _)| *chain == chain_id)
      .map(|(_, slot)| Arc::clone(slot))
      .collect();
    for slot in slots {
      *slot.lock().await = NonceState::Unset;
    }
  }
}

impl NonceGuard {
  /// Current state.
  pub fn state(&self) -> NonceState {
    *self.state
  }

  /// The nonce to attach to the next transaction, if known.
  pub fn value(&self) -> Option<u64> {
    match *self.state {
      NonceState::Set(nonce) => Some(nonce),
      _ => None,
    }
  }

  /// Query the pending-inclusive count unless already set.
  ///
  /// Transient failures are retried with exponential backoff; after the
  /// last attempt the mirror stays `Unset` and the error is returned.
  /// `Ok(None)` means the chain has no account nonce.
  #[instrument(skip(self, adapter), fields(account = %self.account, chain_id = self.chain_id))]
  pub async fn sync(&mut self, adapter: &Arc<dyn ChainAdapter>) -> Result<Option<u64>, TxError> {
    if let NonceState::Set(nonce) = *self.state {
      return Ok(Some(nonce));
    }

    *self.state = NonceState::Syncing;
    if let Some(metrics) = &self.metrics {
      let chain = self.chain_id.to_string();
      metrics.nonce_resyncs.with_label_values(&[chain.as_str()]).inc();
    }

    let attempts = self.policy.attempts.max(1);
    let mut delay = self.policy.backoff;

    for attempt in 1..=attempts {
      match adapter.get_nonce(&self.account).await {
        Ok(Some(nonce)) => {
          *self.state = NonceState::Set(nonce);
          info!(nonce, "Nonce mirror synced");
          return Ok(Some(nonce));
        }
        Ok(None) => {
          *self.state = NonceState::Unset;
          return Ok(None);
        }
        Err(e) if e.is_transient() && attempt < attempts => {
          warn!(attempt, error = %e, "Nonce sync failed, retrying");
          sleep(delay).await;
          delay *= 2;
        }
        Err(e) => {
          *self.state = NonceState::Unset;
          return Err(if e.is_transient() {
            TxError::TransientNetwork(e.to_string())
          } else {
            TxError::NotReady(e.to_string())
          });
        }
      }
    }

    *self.state = NonceState::Unset;
    Err(TxError::TransientNetwork("nonce sync attempts exhausted".into()))
  }

  /// Move past the nonce just used. No-op while unset.
  pub fn advance(&mut self) {
    if let NonceState::Set(nonce) = *self.state {
      *self.state = NonceState::Set(nonce + 1);
    }
  }

  /// Forget the mirrored value; the next submission re-syncs.
  pub fn invalidate(&mut self) {
    *self.state = NonceState::Unset;
  }
}
