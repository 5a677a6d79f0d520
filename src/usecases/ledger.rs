//! Transaction Ledger Use Case - In-memory Record Store
//!
//! Holds every `TransactionRecord` of the session. Records are appended
//! once per broadcast attempt and only move forward
//! (`submitted → confirmed | failed`). Storage I/O is not done here: the
//! persistence layer receives `snapshot()` and hands back `restore()`.

use std::sync::Arc;

use tokio::sync::{Notify, RwLock};
use tracing::{debug, warn};

use crate::domain::transaction::{TransactionRecord, TxStatus, clip_message};

/// Session-wide list of transaction records.
pub struct TransactionLedger {
  records: RwLock<Vec<TransactionRecord>>,
  /// Signalled whenever a `submitted` record is added.
  submitted: Arc<Notify>,
}

impl Default for TransactionLedger {
  fn default() -> Self {
    Self::new()
  }
}

impl TransactionLedger {
  /// Create an empty ledger.
  pub fn new() -> Self {
    Self {
      records: RwLock::new(Vec::new()),
      submitted: Arc::new(Notify::new()),
    }
  }

  /// Handle notified on every new `submitted` record.
  pub fn submitted_signal(&self) -> Arc<Notify> {
    Arc::clone(&self.submitted)
  }

  /// Append a record (newest last).
  pub async fn append(&self, record: TransactionRecord) {
    let wake = record.status == TxStatus::Submitted;
    debug!(id = %record.id, chain_id = record.chain_id, status = %record.status, "Record appended");
    self.records.write().await.push(record);
    if wake {
      self.submitted.notify_one();
    }
  }

  /// Move record `id` to a terminal status.
  ///
  /// Returns `false` (and changes nothing) when the record is unknown or
  /// the transition would go backwards.
  pub async fn finalize(&self, id: &str, status: TxStatus, error: Option<&str>) -> bool {
    let mut records = self.records.write().await;
    let Some(record) = records.iter_mut().find(|r| r.id == id) else {
      return false;
    };

    if !record.status.can_transition_to(status) {
      warn!(id, from = %record.status, to = %status, "Refusing backwards status transition");
      return false;
    }

    record.status = status;
    record.error = error.map(clip_message);
    true
  }

  /// Records still awaiting a receipt on `chain_id`.
  pub async fn submitted_for_chain(&self, chain_id: u64) -> Vec<TransactionRecord> {
    self
      .records
      .read()
      .await
      .iter()
      .filter(|r| r.chain_id == chain_id && r.status == TxStatus::Submitted)
      .cloned()
      .collect()
  }

  /// Number of records awaiting a receipt on any chain.
  pub async fn submitted_count(&self) -> usize {
    self
      .records
      .read()
      .await
      .iter()
      .filter(|r| r.status == TxStatus::Submitted)
      .count()
  }

  /// Look up one record.
  pub async fn get(&self, id: &str) -> Option<TransactionRecord> {
    self.records.read().await.iter().find(|r| r.id == id).cloned()
  }

  /// All records, oldest first.
  pub async fn records(&self) -> Vec<TransactionRecord> {
    self.records.read().await.clone()
  }

  /// Remove every record.
  pub async fn clear(&self) {
    self.records.write().await.clear();
  }

  /// Copy handed to the persistence layer.
  pub async fn snapshot(&self) -> Vec<TransactionRecord> {
    self.records().await
  }

  /// Replace the ledger with persisted records.
  pub async fn restore(&self, records: Vec<TransactionRecord>) {
    let pending = records.iter().any(|r| r.status == TxStatus::Submitted);
    *self.records.write().await = records;
    if pending {
      self.submitted.notify_one();
    }
  }
}
