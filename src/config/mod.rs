//! Configuration Module - TOML-based Wallet Core Configuration
//!
//! Loads and validates configuration from `config.toml`. Chain endpoints,
//! cache lifetimes, fee multipliers and the poll schedule are externalized
//! here. The signing key is never read from this file; it comes from the
//! `WALLET_PRIVATE_KEY` environment variable.

pub mod loader;

use std::time::Duration;

use alloy::primitives::Address;
use serde::Deserialize;

use crate::domain::fees::FeeMultipliers;
use crate::domain::poll::PollSchedule;
use crate::ports::chain::ChainFamily;
use crate::usecases::nonce_mirror::SyncPolicy;

/// Top-level wallet configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before any transport is opened.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Wallet identity and logging.
  pub wallet: WalletConfig,
  /// Chain endpoints.
  pub chains: Vec<ChainConfig>,
  /// JSON-RPC response cache.
  #[serde(default)]
  pub rpc_cache: RpcCacheConfig,
  /// Fee oracle.
  #[serde(default)]
  pub fees: FeesConfig,
  /// Nonce mirror sync policy.
  #[serde(default)]
  pub nonce: NonceConfig,
  /// Receipt poll schedule.
  #[serde(default)]
  pub poller: PollerConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Watched multisig accounts.
  #[serde(default)]
  pub multisig: MultisigConfig,
}

impl AppConfig {
  /// The chain marked active, or the first one.
  pub fn active_chain(&self) -> Option<&ChainConfig> {
    self
      .chains
      .iter()
      .find(|c| c.active)
      .or_else(|| self.chains.first())
  }
}

/// Wallet identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
  /// Human-readable instance name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// One chain endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
  /// Numeric chain id (EVM chain id, or the TRON network id).
  pub chain_id: u64,
  /// Display name.
  pub name: String,
  /// Chain family behind `rpc_url`.
  #[serde(default = "default_family")]
  pub family: ChainFamily,
  /// JSON-RPC URL (EVM) or REST base URL (TRON).
  pub rpc_url: String,
  /// TRON grid API key, sent as `TRON-PRO-API-KEY`.
  #[serde(default)]
  pub api_key: Option<String>,
  /// Whether this chain is selected at startup.
  #[serde(default)]
  pub active: bool,
}

/// JSON-RPC cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcCacheConfig {
  /// Lifetime of cacheable reads (milliseconds).
  #[serde(default = "default_cache_ttl")]
  pub ttl_ms: u64,
  /// Maximum number of cached entries.
  #[serde(default = "default_cache_capacity")]
  pub capacity: usize,
  /// HTTP request timeout (seconds).
  #[serde(default = "default_request_timeout")]
  pub timeout_seconds: u64,
  /// Concurrent requests per transport.
  #[serde(default = "default_max_concurrent")]
  pub max_concurrent: usize,
  /// Retries on 429, 5xx and connection errors.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
}

impl RpcCacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_millis(self.ttl_ms)
  }
}

impl Default for RpcCacheConfig {
  fn default() -> Self {
    Self {
      ttl_ms: default_cache_ttl(),
      capacity: default_cache_capacity(),
      timeout_seconds: default_request_timeout(),
      max_concurrent: default_max_concurrent(),
      max_retries: default_max_retries(),
    }
  }
}

/// Fee oracle configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FeesConfig {
  /// Lifetime of cached fee data (milliseconds).
  #[serde(default = "default_fee_ttl")]
  pub ttl_ms: u64,
  /// EIP-1559 max fee multiplier (percent).
  #[serde(default = "default_max_fee_pct")]
  pub max_fee_multiplier_pct: u32,
  /// EIP-1559 priority fee multiplier (percent).
  #[serde(default = "default_priority_fee_pct")]
  pub priority_fee_multiplier_pct: u32,
  /// Legacy gas price multiplier (percent).
  #[serde(default = "default_legacy_pct")]
  pub legacy_multiplier_pct: u32,
}

impl FeesConfig {
  pub fn ttl(&self) -> Duration {
    Duration::from_millis(self.ttl_ms)
  }

  pub fn multipliers(&self) -> FeeMultipliers {
    FeeMultipliers {
      max_fee_pct: self.max_fee_multiplier_pct,
      priority_fee_pct: self.priority_fee_multiplier_pct,
      legacy_pct: self.legacy_multiplier_pct,
    }
  }
}

impl Default for FeesConfig {
  fn default() -> Self {
    Self {
      ttl_ms: default_fee_ttl(),
      max_fee_multiplier_pct: default_max_fee_pct(),
      priority_fee_multiplier_pct: default_priority_fee_pct(),
      legacy_multiplier_pct: default_legacy_pct(),
    }
  }
}

/// Nonce mirror configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NonceConfig {
  /// Sync attempts before giving up.
  #[serde(default = "default_sync_attempts")]
  pub sync_attempts: u32,
  /// First retry delay, doubled per retry (milliseconds).
  #[serde(default = "default_sync_backoff")]
  pub sync_backoff_ms: u64,
}

impl NonceConfig {
  pub fn policy(&self) -> SyncPolicy {
    SyncPolicy {
      attempts: self.sync_attempts,
      backoff: Duration::from_millis(self.sync_backoff_ms),
    }
  }
}

impl Default for NonceConfig {
  fn default() -> Self {
    Self {
      sync_attempts: default_sync_attempts(),
      sync_backoff_ms: default_sync_backoff(),
    }
  }
}

/// Receipt poller configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
  #[serde(default = "default_fast_interval")]
  pub fast_interval_secs: u64,
  #[serde(default = "default_medium_interval")]
  pub medium_interval_secs: u64,
  #[serde(default = "default_slow_interval")]
  pub slow_interval_secs: u64,
  /// Polls at the fast interval.
  #[serde(default = "default_fast_attempts")]
  pub fast_attempts: u32,
  /// Polls (cumulative) before the slow interval.
  #[serde(default = "default_medium_attempts")]
  pub medium_attempts: u32,
  /// Wall-clock budget per transaction (seconds).
  #[serde(default = "default_poll_timeout")]
  pub timeout_secs: u64,
  /// Indefinite answers before giving up.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,
  /// Quiet period before a post-confirmation refresh (milliseconds).
  #[serde(default = "default_refresh_debounce")]
  pub refresh_debounce_ms: u64,
}

impl PollerConfig {
  pub fn schedule(&self) -> PollSchedule {
    PollSchedule {
      fast_interval: Duration::from_secs(self.fast_interval_secs),
      medium_interval: Duration::from_secs(self.medium_interval_secs),
      slow_interval: Duration::from_secs(self.slow_interval_secs),
      fast_attempts: self.fast_attempts,
      medium_attempts: self.medium_attempts,
      timeout: Duration::from_secs(self.timeout_secs),
      max_attempts: self.max_attempts,
    }
  }

  pub fn refresh_debounce(&self) -> Duration {
    Duration::from_millis(self.refresh_debounce_ms)
  }
}

impl Default for PollerConfig {
  fn default() -> Self {
    Self {
      fast_interval_secs: default_fast_interval(),
      medium_interval_secs: default_medium_interval(),
      slow_interval_secs: default_slow_interval(),
      fast_attempts: default_fast_attempts(),
      medium_attempts: default_medium_attempts(),
      timeout_secs: default_poll_timeout(),
      max_attempts: default_max_attempts(),
      refresh_debounce_ms: default_refresh_debounce(),
    }
  }
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
  /// Interval between chain health probes (seconds).
  #[serde(default = "default_health_interval")]
  pub health_interval_seconds: u64,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
      health_interval_seconds: default_health_interval(),
    }
  }
}

/// Multisig accounts to report on at startup.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MultisigConfig {
  #[serde(default)]
  pub safes: Vec<SafeConfig>,
}

/// A watched Safe.
#[derive(Debug, Clone, Deserialize)]
pub struct SafeConfig {
  pub chain_id: u64,
  pub address: Address,
  /// Display name.
  #[serde(default)]
  pub label: Option<String>,
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

fn default_true() -> bool {
  true
}

fn default_family() -> ChainFamily {
  ChainFamily::Evm
}

fn default_cache_ttl() -> u64 {
  2_000
}

fn default_cache_capacity() -> usize {
  200
}

fn default_request_timeout() -> u64 {
  30
}

fn default_max_concurrent() -> usize {
  16
}

fn default_max_retries() -> u32 {
  3
}

fn default_fee_ttl() -> u64 {
  15_000
}

fn default_max_fee_pct() -> u32 {
  150
}

fn default_priority_fee_pct() -> u32 {
  120
}

fn default_legacy_pct() -> u32 {
  120
}

fn default_sync_attempts() -> u32 {
  3
}

fn default_sync_backoff() -> u64 {
  250
}

fn default_fast_interval() -> u64 {
  5
}

fn default_medium_interval() -> u64 {
  15
}

fn default_slow_interval() -> u64 {
  30
}

fn default_fast_attempts() -> u32 {
  6
}

fn default_medium_attempts() -> u32 {
  18
}

fn default_poll_timeout() -> u64 {
  600 // 10 minutes
}

fn default_max_attempts() -> u32 {
  60
}

fn default_refresh_debounce() -> u64 {
  1_500
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

fn default_health_port() -> u16 {
  8080
}

fn default_health_interval() -> u64 {
  15
}
