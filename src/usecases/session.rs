//! Wallet Session Use Case - Active Account/Chain Scope
//!
//! Tracks which account and chain the user is acting on and which adapter
//! serves each chain. Switching account or chain, or replacing a chain's
//! provider, invalidates the affected nonce mirrors. The receipt poller
//! follows the scope through a `watch` channel; records of other chains
//! keep their `submitted` status and are picked up again when their chain
//! becomes active.

use std::collections::HashMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};
use tokio::sync::{RwLock, watch};
use tracing::{info, instrument};

use super::nonce_mirror::NonceMirror;
use super::submitter::{Submitter, TxDraft};
use crate::domain::error::TxError;
use crate::domain::transaction::SendResult;
use crate::ports::chain::ChainAdapter;

/// The (account, chain) the user is acting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScope {
  /// EVM address of the active key.
  pub account: Option<Address>,
  /// Active chain id.
  pub chain_id: u64,
}

/// Chain id → adapter.
#[derive(Default)]
pub struct ChainRegistry {
  chains: RwLock<HashMap<u64, Arc<dyn ChainAdapter>>>,
}

impl ChainRegistry {
  /// Create an empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// Register (or replace) the adapter of a chain; returns the previous one.
  pub async fn insert(&self, adapter: Arc<dyn ChainAdapter>) -> Option<Arc<dyn ChainAdapter>> {
    self.chains.write().await.insert(adapter.chain_id(), adapter)
  }

  /// Adapter serving `chain_id`.
  pub async fn get(&self, chain_id: u64) -> Option<Arc<dyn ChainAdapter>> {
    self.chains.read().await.get(&chain_id).cloned()
  }

  /// Every registered adapter.
  pub async fn all(&self) -> Vec<Arc<dyn ChainAdapter>> {
    self.chains.read().await.values().cloned().collect()
  }

  /// Whether every registered node answers.
  pub async fn all_healthy(&self) -> bool {
    let adapters = self.all().await;
    let checks = adapters.iter().map(|a| a.is_healthy());
    futures_util::future::join_all(checks)
      .await
      .into_iter()
      .all(|healthy| healthy)
  }
}

/// User-facing session over the registry, mirror and submitter.
pub struct WalletSession {
  registry: Arc<ChainRegistry>,
  mirror: Arc<NonceMirror>,
  submitter: Arc<Submitter>,
  scope: watch::Sender<ActiveScope>,
}

impl WalletSession {
  /// Create a session scoped to `chain_id` with no active account.
  pub fn new(registry: Arc<ChainRegistry>, submitter: Arc<Submitter>, chain_id: u64) -> Self {
    let (scope, _) = watch::channel(ActiveScope {
      account: None,
      chain_id,
    });
    Self {
      registry,
      mirror: Arc::clone(submitter.mirror()),
      submitter,
      scope,
    }
  }

  /// Follow scope changes (used by the receipt poller).
  pub fn subscribe(&self) -> watch::Receiver<ActiveScope> {
    self.scope.subscribe()
  }

  /// Current scope.
  pub fn scope(&self) -> ActiveScope {
    self.scope.borrow().clone()
  }

  /// Registry shared with the poller and multisig engine.
  pub fn registry(&self) -> &Arc<ChainRegistry> {
    &self.registry
  }

  /// Adapter of the active chain.
  pub async fn active_adapter(&self) -> Result<Arc<dyn ChainAdapter>, TxError> {
    let chain_id = self.scope.borrow().chain_id;
    self
      .registry
      .get(chain_id)
      .await
      .ok_or_else(|| TxError::NotReady(format!("no provider for chain {chain_id}")))
  }

  /// Active account in the active chain's notation.
  pub async fn active_account(&self) -> Result<(Arc<dyn ChainAdapter>, String), TxError> {
    let adapter = self.active_adapter().await?;
    let account = self
      .scope
      .borrow()
      .account
      .ok_or_else(|| TxError::NotReady("no active account".into()))?;
    let formatted = adapter.account_address(&account);
    Ok((adapter, formatted))
  }

  /// Make `account` the active signer.
  #[instrument(skip(self))]
  pub async fn switch_account(&self, account: Address) {
    let changed = self.scope.send_if_modified(|scope| {
      if scope.account == Some(account) {
        return false;
      }
      scope.account = Some(account);
      true
    });
    if changed {
      self.mirror.invalidate_all().await;
      info!(account = %account, "Active account switched");
    }
  }

  /// Make `chain_id` the active chain.
  #[instrument(skip(self))]
  pub async fn switch_chain(&self, chain_id: u64) -> Result<(), TxError> {
    if self.registry.get(chain_id).await.is_none() {
      return Err(TxError::NotReady(format!("no provider for chain {chain_id}")));
    }

    let previous = self.scope.borrow().chain_id;
    let changed = self.scope.send_if_modified(|scope| {
      if scope.chain_id == chain_id {
        return false;
      }
      scope.chain_id = chain_id;
      true
    });
    if changed {
      self.mirror.invalidate_chain(previous).await;
      self.mirror.invalidate_chain(chain_id).await;
      info!(from = previous, to = chain_id, "Active chain switched");
    }
    Ok(())
  }

  /// Swap the adapter of a chain (e.g. a new RPC URL).
  ///
  /// The previous adapter's response cache is dropped and every mirror of
  /// that chain is reset.
  #[instrument(skip(self, adapter), fields(chain_id = adapter.chain_id()))]
  pub async fn replace_provider(&self, adapter: Arc<dyn ChainAdapter>) {
    let chain_id = adapter.chain_id();
    let provider = adapter.provider_id();
    if let Some(previous) = self.registry.insert(adapter).await {
      previous.clear_cache().await;
    }
    self.mirror.invalidate_chain(chain_id).await;
    info!(provider = %provider, "Provider replaced");
  }

  /// Native balance of the active account on the active chain.
  pub async fn balance(&self) -> Result<U256, TxError> {
    let (adapter, account) = self.active_account().await?;
    adapter.get_balance(&account).await.map_err(|e| {
      if e.is_transient() {
        TxError::TransientNetwork(e.to_string())
      } else {
        TxError::NotReady(e.to_string())
      }
    })
  }

  /// Send from the active account on the active chain.
  pub async fn send(&self, draft: TxDraft) -> SendResult {
    match self.active_account().await {
      Ok((adapter, account)) => self.submitter.submit(&adapter, &account, draft).await,
      Err(e) => e.into(),
    }
  }
}
