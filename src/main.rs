//! Wallet Transaction Core - Entry Point
//!
//! Initializes configuration, logging, chain connections and the
//! background tasks of the wallet core. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config (path from WALLET_CONFIG, default config.toml) + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Load the signing key from WALLET_PRIVATE_KEY
//! 4. Per chain: HTTP transport → RPC cache → EVM adapter, or TRON adapter
//! 5. Create fee oracle, ledger, nonce mirror, submitter, session, multisig engine
//! 6. Spawn metrics server (/metrics) and health server (/live + /ready)
//! 7. Spawn receipt poller and chain health probe
//! 8. Report balance and watched Safes
//! 9. Wait for SIGINT → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use wallet_tx_core::adapters::chain::{EvmAdapter, FeeOracle, LocalKeySigner, TronAdapter};
use wallet_tx_core::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use wallet_tx_core::adapters::rpc::{HttpTransport, HttpTransportConfig, RpcCacheProvider};
use wallet_tx_core::config::{self, AppConfig, ChainConfig};
use wallet_tx_core::ports::{ChainAdapter, ChainFamily, HashSigner, RpcTransport};
use wallet_tx_core::usecases::{
  ChainRegistry, MultisigEngine, NonceMirror, ReceiptPoller, Submitter, TransactionLedger,
  WalletSession,
};

#[tokio::main]
async fn main() -> Result<()> {
  // ── 1. Load configuration ───────────────────────────────
  let config_path = config::loader::config_path();
  let config = config::loader::load_config(&config_path).context("Failed to load configuration")?;

  // ── 2. Initialize structured JSON logging ───────────────
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.wallet.log_level)),
    )
    .json()
    .init();

  info!(
    name = %config.wallet.name,
    version = env!("CARGO_PKG_VERSION"),
    config = %config_path,
    chains = config.chains.len(),
    "Starting wallet transaction core"
  );

  // ── 3. Shutdown channel, metrics, signer ────────────────
  let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
  let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);
  let health = Arc::new(HealthState::new());

  let signer = Arc::new(LocalKeySigner::from_env().context("Failed to load signing key")?);
  info!(address = %signer.address(), "Signer loaded");

  // ── 4. Chain adapters ───────────────────────────────────
  let registry = Arc::new(ChainRegistry::new());
  for chain in &config.chains {
    let adapter = connect_chain(&config, chain, &signer, &metrics)
      .await
      .with_context(|| format!("Failed to connect chain {} ({})", chain.name, chain.chain_id))?;
    registry.insert(adapter).await;
  }
  let active_chain = config
    .active_chain()
    .map(|c| c.chain_id)
    .context("No chain configured")?;

  // ── 5. Use cases ────────────────────────────────────────
  let fees = Arc::new(FeeOracle::new(config.fees.ttl(), config.fees.multipliers()));
  let ledger = Arc::new(TransactionLedger::new());
  let mirror = Arc::new(NonceMirror::new(config.nonce.policy()).with_metrics(Arc::clone(&metrics)));
  let submitter = Arc::new(
    Submitter::new(Arc::clone(&ledger), mirror, fees).with_metrics(Arc::clone(&metrics)),
  );
  let session = Arc::new(WalletSession::new(
    Arc::clone(&registry),
    Arc::clone(&submitter),
    active_chain,
  ));
  session.switch_account(signer.address()).await;
  let multisig = Arc::new(MultisigEngine::new(Arc::clone(&submitter)).with_metrics(Arc::clone(&metrics)));

  let poller = Arc::new(
    ReceiptPoller::new(
      Arc::clone(&ledger),
      Arc::clone(&registry),
      session.subscribe(),
      config.poller.schedule(),
      config.poller.refresh_debounce(),
    )
    .with_metrics(Arc::clone(&metrics)),
  );

  // ── 6. Metrics + health servers ─────────────────────────
  let mut handles = Vec::new();
  if config.metrics.enabled {
    let metrics_shutdown = shutdown_tx.subscribe();
    let bind_address = config.metrics.bind_address.clone();
    let metrics_ref = Arc::clone(&metrics);
    handles.push(tokio::spawn(async move {
      if let Err(e) = metrics_ref.serve(bind_address, metrics_shutdown).await {
        error!(error = %e, "Metrics server failed");
      }
    }));
  }

  let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
  let health_shutdown = shutdown_tx.subscribe();
  handles.push(tokio::spawn(async move {
    if let Err(e) = health_server.run(health_shutdown).await {
      error!(error = %e, "Health server failed");
    }
  }));

  // ── 7. Receipt poller + chain health probe ──────────────
  let poller_shutdown = shutdown_tx.subscribe();
  let poller_health = Arc::clone(&health);
  let poller_ref = Arc::clone(&poller);
  handles.push(tokio::spawn(async move {
    poller_health.set_poller_running(true);
    poller_ref.run(poller_shutdown).await;
    poller_health.set_poller_running(false);
  }));

  let probe_shutdown = shutdown_tx.subscribe();
  let probe_interval = Duration::from_secs(config.metrics.health_interval_seconds.max(1));
  handles.push(tokio::spawn(probe_chains(
    Arc::clone(&registry),
    Arc::clone(&health),
    probe_interval,
    probe_shutdown,
  )));

  // ── 8. Startup report ───────────────────────────────────
  match session.balance().await {
    Ok(balance) => info!(chain_id = active_chain, balance = %balance, "Active account balance"),
    Err(e) => warn!(chain_id = active_chain, error = %e, "Could not read balance"),
  }

  for safe in &config.multisig.safes {
    let Some(adapter) = registry.get(safe.chain_id).await else {
      continue;
    };
    match multisig.details(&adapter, safe.address).await {
      Ok(details) => info!(
        safe = %safe.address,
        label = safe.label.as_deref().unwrap_or(""),
        chain_id = safe.chain_id,
        owners = details.owners.len(),
        threshold = details.threshold,
        nonce = details.nonce,
        is_owner = details.is_owner(&signer.address()),
        "Watching Safe"
      ),
      Err(e) => warn!(safe = %safe.address, error = %e, "Could not read Safe"),
    }
  }

  info!("All tasks spawned, wallet core is running");

  // ── 9. Wait for SIGINT ──────────────────────────────────
  signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
  info!("SIGINT received, initiating graceful shutdown");

  let _ = shutdown_tx.send(());
  health.set_chain_healthy(false);

  let pending = ledger.submitted_count().await;
  if pending > 0 {
    warn!(pending, "Shutting down with transactions still awaiting receipts");
  }

  for handle in handles {
    let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
  }

  info!("Shutdown complete");
  Ok(())
}

/// Build the adapter for one configured chain.
async fn connect_chain(
  config: &AppConfig,
  chain: &ChainConfig,
  signer: &Arc<LocalKeySigner>,
  metrics: &Arc<MetricsRegistry>,
) -> Result<Arc<dyn ChainAdapter>> {
  match chain.family {
    ChainFamily::Evm => {
      let http = HttpTransport::new(HttpTransportConfig {
        url: chain.rpc_url.clone(),
        timeout: Duration::from_secs(config.rpc_cache.timeout_seconds),
        max_concurrent: config.rpc_cache.max_concurrent,
        max_retries: config.rpc_cache.max_retries,
        ..HttpTransportConfig::default()
      })?;
      let cached: Arc<dyn RpcTransport> = Arc::new(
        RpcCacheProvider::new(Arc::new(http), config.rpc_cache.ttl(), config.rpc_cache.capacity)
          .with_metrics(Arc::clone(metrics)),
      );
      let adapter = EvmAdapter::connect(chain.chain_id, cached, signer.evm_wallet()).await?;
      Ok(Arc::new(adapter))
    }
    ChainFamily::Tron => {
      let hash_signer: Arc<dyn HashSigner> = Arc::clone(signer) as Arc<dyn HashSigner>;
      let adapter = TronAdapter::new(
        chain.chain_id,
        chain.rpc_url.clone(),
        chain.api_key.clone(),
        hash_signer,
      )?;
      info!(chain_id = chain.chain_id, account = %adapter.signer_address(), "TRON adapter ready");
      Ok(Arc::new(adapter))
    }
  }
}

/// Probe every chain periodically and publish the result to readiness.
async fn probe_chains(
  registry: Arc<ChainRegistry>,
  health: Arc<HealthState>,
  interval: Duration,
  mut shutdown_rx: broadcast::Receiver<()>,
) {
  let mut ticker = tokio::time::interval(interval);
  loop {
    tokio::select! {
      biased;
      _ = shutdown_rx.recv() => break,
      _ = ticker.tick() => {
        let healthy = registry.all_healthy().await;
        if !healthy {
          warn!("At least one chain transport is unhealthy");
        }
        health.set_chain_healthy(healthy);
      }
    }
  }
}
