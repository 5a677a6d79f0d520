//! Prometheus Metrics Registry - Wallet Core Observability
//!
//! Registers and exposes Prometheus metrics for RPC volume, submissions,
//! receipt finalization, nonce re-syncs and multisig actions.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

/// Centralized Prometheus metrics for the wallet core.
///
/// All metrics follow the naming convention `wallet_*`.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// RPC lookups by method and answer source
    /// (`cache`, `coalesced`, `network`, `passthrough`).
    pub rpc_requests: IntCounterVec,
    /// Successful broadcasts per chain.
    pub tx_submitted: IntCounterVec,
    /// Records leaving `submitted`, per chain and final status.
    pub tx_finalized: IntCounterVec,
    /// Nonce mirror invalidations followed by a network re-sync.
    pub nonce_resyncs: IntCounterVec,
    /// Multisig actions by kind and outcome.
    pub safe_actions: IntCounterVec,
    /// Records currently awaiting a receipt.
    pub pending_receipts: IntGauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let rpc_requests = IntCounterVec::new(
            Opts::new("wallet_rpc_requests_total", "JSON-RPC lookups by answer source"),
            &["method", "source"],
        )?;

        let tx_submitted = IntCounterVec::new(
            Opts::new("wallet_tx_submitted_total", "Transactions accepted by the node"),
            &["chain"],
        )?;

        let tx_finalized = IntCounterVec::new(
            Opts::new(
                "wallet_tx_finalized_total",
                "Transactions resolved by the receipt poller",
            ),
            &["chain", "status"],
        )?;

        let nonce_resyncs = IntCounterVec::new(
            Opts::new("wallet_nonce_resyncs_total", "Nonce mirror syncs from the network"),
            &["chain"],
        )?;

        let safe_actions = IntCounterVec::new(
            Opts::new("wallet_safe_actions_total", "Multisig actions"),
            &["action", "outcome"],
        )?;

        let pending_receipts = IntGauge::new(
            "wallet_pending_receipts",
            "Transactions currently awaiting a receipt",
        )?;

        registry.register(Box::new(rpc_requests.clone()))?;
        registry.register(Box::new(tx_submitted.clone()))?;
        registry.register(Box::new(tx_finalized.clone()))?;
        registry.register(Box::new(nonce_resyncs.clone()))?;
        registry.register(Box::new(safe_actions.clone()))?;
        registry.register(Box::new(pending_receipts.clone()))?;

        Ok(Self {
            registry,
            rpc_requests,
            tx_submitted,
            tx_finalized,
            nonce_resyncs,
            safe_actions,
            pending_receipts,
        })
    }

    /// Render every registered metric in the text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            warn!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
