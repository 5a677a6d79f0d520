//! Receipt Poller Use Case - Adaptive-backoff Confirmation Loop
//!
//! Resolves `submitted` records of the active chain to `confirmed` or
//! `failed`. Each record gets ephemeral `PollMeta`; due records are
//! queried in parallel, indefinite answers push the next poll out along
//! the schedule (5s, then 15s, then 30s) and records past the wall-clock
//! budget or attempt cap fail with a timeout error.
//!
//! The loop sleeps until the earliest `next_poll_at` and is idle (no timer)
//! while nothing is pending. New submissions and scope changes wake it.
//! Confirmations within a cycle schedule one debounced refresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, instrument, warn};

use super::ledger::TransactionLedger;
use super::session::{ActiveScope, ChainRegistry};
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::error::TIMEOUT_MESSAGE;
use crate::domain::poll::{PollMeta, PollSchedule};
use crate::domain::transaction::{TransactionRecord, TxStatus, now_ms};

/// Outcome of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollReport {
  /// Records that reached `confirmed`.
  pub confirmed: Vec<String>,
  /// Records the chain reported as failed.
  pub failed: Vec<String>,
  /// Records failed by the timeout budget.
  pub timed_out: Vec<String>,
  /// Receipt queries issued this cycle.
  pub polled: usize,
  /// Records still awaiting a receipt afterwards.
  pub pending: usize,
}

/// Coalesces bursts of refresh requests into one.
///
/// Every `trigger` restarts the delay; subscribers see the generation
/// counter move once per quiet period.
pub struct RefreshDebouncer {
  delay: Duration,
  generation: Arc<watch::Sender<u64>>,
  pending: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RefreshDebouncer {
  /// Create a debouncer firing `delay` after the last trigger.
  pub fn new(delay: Duration) -> Self {
    let (generation, _) = watch::channel(0);
    Self {
      delay,
      generation: Arc::new(generation),
      pending: std::sync::Mutex::new(None),
    }
  }

  /// Receive a notification per fired refresh.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.generation.subscribe()
  }

  /// Number of refreshes fired so far.
  pub fn fired(&self) -> u64 {
    *self.generation.borrow()
  }

  /// Request a refresh.
  pub fn trigger(&self) {
    let generation = Arc::clone(&self.generation);
    let delay = self.delay;
    let task = tokio::spawn(async move {
      sleep(delay).await;
      generation.send_modify(|g| *g += 1);
    });

    let mut pending = self
      .pending
      .lock()
      .unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(previous) = pending.replace(task) {
      previous.abort();
    }
  }
}

/// Background confirmation loop.
pub struct ReceiptPoller {
  ledger: Arc<TransactionLedger>,
  registry: Arc<ChainRegistry>,
  scope: watch::Receiver<ActiveScope>,
  schedule: PollSchedule,
  meta: Mutex<HashMap<String, PollMeta>>,
  refresh: RefreshDebouncer,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl ReceiptPoller {
  /// Create a poller following `scope`.
  pub fn new(
    ledger: Arc<TransactionLedger>,
    registry: Arc<ChainRegistry>,
    scope: watch::Receiver<ActiveScope>,
    schedule: PollSchedule,
    refresh_debounce: Duration,
  ) -> Self {
    Self {
      ledger,
      registry,
      scope,
      schedule,
      meta: Mutex::new(HashMap::new()),
      refresh: RefreshDebouncer::new(refresh_debounce),
      metrics: None,
    }
  }

  /// Report finalized records and the pending gauge.
  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Downstream refresh notifications.
  pub fn refresh_signal(&self) -> watch::Receiver<u64> {
    self.refresh.subscribe()
  }

  /// Poll metadata of a record, if tracked.
  pub async fn meta(&self, id: &str) -> Option<PollMeta> {
    self.meta.lock().await.get(id).copied()
  }

  /// Earliest scheduled poll, `None` while idle.
  pub async fn next_wake(&self) -> Option<Instant> {
    self.meta.lock().await.values().map(|m| m.next_poll_at).min()
  }

  /// Run one poll cycle at `now`.
  #[instrument(skip(self), level = "debug")]
  pub async fn poll_due(&self, now: Instant) -> PollReport {
    let chain_id = self.scope.borrow().chain_id;
    let records = self.ledger.submitted_for_chain(chain_id).await;
    let wall_now = now_ms();
    let mut report = PollReport::default();

    // Pick the due set and retire expired records under the meta lock.
    let due: Vec<TransactionRecord> = {
      let mut meta = self.meta.lock().await;
      meta.retain(|id, _| records.iter().any(|r| &r.id == id));

      let mut due = Vec::new();
      for record in &records {
        let entry = meta
          .entry(record.id.clone())
          .or_insert_with(|| PollMeta::new(now, &self.schedule));

        if self.is_expired(entry, record, now, wall_now) {
          meta.remove(&record.id);
          self.time_out(record, &mut report).await;
        } else if entry.is_due(now) {
          due.push(record.clone());
        }
      }
      due
    };

    if !due.is_empty() {
      match self.registry.get(chain_id).await {
        Some(adapter) => {
          report.polled = due.len();
          let lookups = due.iter().map(|record| {
            let adapter = Arc::clone(&adapter);
            async move {
              match record.hash.as_deref() {
                Some(hash) => adapter.get_receipt(hash).await,
                None => Ok(None),
              }
            }
          });
          let results = futures_util::future::join_all(lookups).await;

          let mut meta = self.meta.lock().await;
          for (record, result) in due.iter().zip(results) {
            match result {
              Ok(Some(status)) => {
                meta.remove(&record.id);
                if status.success {
                  if self.ledger.finalize(&record.id, TxStatus::Confirmed, None).await {
                    info!(id = %record.id, hash = ?record.hash, "Transaction confirmed");
                    report.confirmed.push(record.id.clone());
                    self.count_finalized(chain_id, TxStatus::Confirmed);
                  }
                } else {
                  let error = status.error.as_deref().unwrap_or("Transaction failed");
                  if self.ledger.finalize(&record.id, TxStatus::Failed, Some(error)).await {
                    warn!(id = %record.id, hash = ?record.hash, error, "Transaction failed on chain");
                    report.failed.push(record.id.clone());
                    self.count_finalized(chain_id, TxStatus::Failed);
                  }
                }
              }
              other => {
                if let Err(e) = other {
                  debug!(id = %record.id, error = %e, "Receipt lookup failed");
                }
                let Some(entry) = meta.get_mut(&record.id) else {
                  continue;
                };
                entry.record_miss(now, &self.schedule);
                if self.is_expired(entry, record, now, wall_now) {
                  meta.remove(&record.id);
                  self.time_out(record, &mut report).await;
                }
              }
            }
          }
        }
        None => {
          warn!(chain_id, "No adapter for active chain, skipping receipt poll");
          // Count the cycle as a miss so the record backs off and still expires.
          let mut meta = self.meta.lock().await;
          for record in &due {
            if let Some(entry) = meta.get_mut(&record.id) {
              entry.record_miss(now, &self.schedule);
            }
          }
        }
      }
    }

    report.pending = self.meta.lock().await.len();
    if let Some(metrics) = &self.metrics {
      metrics
        .pending_receipts
        .set(i64::try_from(self.ledger.submitted_count().await).unwrap_or(i64::MAX));
    }
    if !report.confirmed.is_empty() {
      self.refresh.trigger();
    }
    report
  }

  /// Age is measured from whichever start is earlier: first sight in this
  /// process or the record's own timestamp.
  fn is_expired(&self, meta: &PollMeta, record: &TransactionRecord, now: Instant, wall_now: u64) -> bool {
    let local_age = now.saturating_duration_since(meta.started_at);
    let wall_age = Duration::from_millis(record.age_ms(wall_now));
    self.schedule.is_expired(meta.attempts, local_age.max(wall_age))
  }

  async fn time_out(&self, record: &TransactionRecord, report: &mut PollReport) {
    if self
      .ledger
      .finalize(&record.id, TxStatus::Failed, Some(TIMEOUT_MESSAGE))
      .await
    {
      warn!(id = %record.id, hash = ?record.hash, "Receipt polling timed out");
      report.timed_out.push(record.id.clone());
      self.count_finalized(record.chain_id, TxStatus::Failed);
    }
  }

  fn count_finalized(&self, chain_id: u64, status: TxStatus) {
    if let Some(metrics) = &self.metrics {
      let chain = chain_id.to_string();
      let status = status.to_string();
      metrics
        .tx_finalized
        .with_label_values(&[chain.as_str(), status.as_str()])
        .inc();
    }
  }

  /// Run until shutdown.
  #[instrument(skip(self, shutdown_rx), name = "receipt_poller")]
  pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
    let submitted = self.ledger.submitted_signal();
    let mut scope = self.scope.clone();
    info!("Receipt poller started");

    loop {
      let report = self.poll_due(Instant::now()).await;
      if report.polled > 0 || !report.timed_out.is_empty() {
        debug!(
          polled = report.polled,
          confirmed = report.confirmed.len(),
          failed = report.failed.len(),
          timed_out = report.timed_out.len(),
          pending = report.pending,
          "Poll cycle finished"
        );
      }

      let wake = self.next_wake().await;
      let timer = async {
        match wake {
          Some(at) => sleep_until(at).await,
          None => std::future::pending::<()>().await,
        }
      };

      tokio::select! {
        _ = shutdown_rx.recv() => {
          info!("Shutdown signal received, stopping receipt poller");
          break;
        }
        _ = submitted.notified() => {}
        changed = scope.changed() => {
          if changed.is_err() {
            info!("Session closed, stopping receipt poller");
            break;
          }
        }
        () = timer => {}
      }
    }
  }
}
