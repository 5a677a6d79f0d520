//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "WALLET_CONFIG";

/// Config file used when `WALLET_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Path of the config file to load.
pub fn config_path() -> String {
  std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    chains = config.chains.len(),
    safes = config.multisig.safes.len(),
    cache_ttl_ms = config.rpc_cache.ttl_ms,
    fee_ttl_ms = config.fees.ttl_ms,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).with_context(|| "Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - At least one chain, with unique ids and non-empty URLs
/// - Positive cache lifetimes and capacity
/// - Fee multipliers that never scale fees down
/// - A monotonic poll schedule with a positive budget
fn validate_config(config: &AppConfig) -> Result<()> {
  // Chain validation
  anyhow::ensure!(
    !config.chains.is_empty(),
    "At least one chain must be configured"
  );

  let mut seen = HashSet::new();
  for (i, chain) in config.chains.iter().enumerate() {
    anyhow::ensure!(
      seen.insert(chain.chain_id),
      "Chain {} ({}) reuses chain_id {}",
      i,
      chain.name,
      chain.chain_id
    );
    anyhow::ensure!(
      !chain.rpc_url.is_empty(),
      "Chain {} ({}) has empty rpc_url",
      i,
      chain.name
    );
  }
  anyhow::ensure!(
    config.chains.iter().filter(|c| c.active).count() <= 1,
    "At most one chain may be marked active"
  );

  // Cache validation
  anyhow::ensure!(config.rpc_cache.ttl_ms > 0, "rpc_cache.ttl_ms must be positive");
  anyhow::ensure!(config.rpc_cache.capacity > 0, "rpc_cache.capacity must be positive");
  anyhow::ensure!(
    config.rpc_cache.max_concurrent > 0,
    "rpc_cache.max_concurrent must be positive"
  );

  // Fee validation
  anyhow::ensure!(config.fees.ttl_ms > 0, "fees.ttl_ms must be positive");
  for (name, pct) in [
    ("max_fee_multiplier_pct", config.fees.max_fee_multiplier_pct),
    ("priority_fee_multiplier_pct", config.fees.priority_fee_multiplier_pct),
    ("legacy_multiplier_pct", config.fees.legacy_multiplier_pct),
  ] {
    anyhow::ensure!(pct >= 100, "fees.{name} must be at least 100, got {pct}");
  }

  // Nonce validation
  anyhow::ensure!(config.nonce.sync_attempts > 0, "nonce.sync_attempts must be positive");

  // Poller validation
  let poller = &config.poller;
  anyhow::ensure!(
    poller.fast_interval_secs > 0
      && poller.fast_interval_secs <= poller.medium_interval_secs
      && poller.medium_interval_secs <= poller.slow_interval_secs,
    "poller intervals must be positive and non-decreasing, got {}/{}/{}",
    poller.fast_interval_secs,
    poller.medium_interval_secs,
    poller.slow_interval_secs
  );
  anyhow::ensure!(
    poller.fast_attempts <= poller.medium_attempts,
    "poller.fast_attempts ({}) must not exceed medium_attempts ({})",
    poller.fast_attempts,
    poller.medium_attempts
  );
  anyhow::ensure!(poller.timeout_secs > 0, "poller.timeout_secs must be positive");
  anyhow::ensure!(poller.max_attempts > 0, "poller.max_attempts must be positive");

  // Multisig validation
  for safe in &config.multisig.safes {
    anyhow::ensure!(
      seen.contains(&safe.chain_id),
      "Safe {} refers to unknown chain {}",
      safe.address,
      safe.chain_id
    );
  }

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ports::chain::ChainFamily;

  const MINIMAL: &str = r#"
    [wallet]
    name = "test"

    [[chains]]
    chain_id = 1
    name = "mainnet"
    rpc_url = "http://localhost:8545"
  "#;

  #[test]
  fn test_load_nonexistent_file() {
    let result = load_config("nonexistent.toml");
    assert!(result.is_err());
  }

  #[test]
  fn test_defaults_applied() {
    let config = parse_config(MINIMAL).unwrap();
    assert_eq!(config.rpc_cache.ttl_ms, 2_000);
    assert_eq!(config.rpc_cache.capacity, 200);
    assert_eq!(config.fees.ttl_ms, 15_000);
    assert_eq!(config.fees.multipliers().max_fee_pct, 150);
    assert_eq!(config.poller.schedule(), crate::domain::poll::PollSchedule::default());
    assert_eq!(config.chains[0].family, ChainFamily::Evm);
    assert_eq!(config.active_chain().unwrap().chain_id, 1);
  }

  #[test]
  fn test_tron_chain_and_active_flag() {
    let text = format!(
      "{MINIMAL}\n[[chains]]\nchain_id = 728126428\nname = \"tron\"\nfamily = \"tron\"\nrpc_url = \"https://api.trongrid.io\"\napi_key = \"k\"\nactive = true\n"
    );
    let config = parse_config(&text).unwrap();
    let active = config.active_chain().unwrap();
    assert_eq!(active.family, ChainFamily::Tron);
    assert_eq!(active.api_key.as_deref(), Some("k"));
  }

  #[test]
  fn test_duplicate_chain_rejected() {
    let text = format!(
      "{MINIMAL}\n[[chains]]\nchain_id = 1\nname = \"dup\"\nrpc_url = \"http://other\"\n"
    );
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_fee_multiplier_below_one_rejected() {
    let text = format!("{MINIMAL}\n[fees]\nlegacy_multiplier_pct = 90\n");
    assert!(parse_config(&text).is_err());
  }

  #[test]
  fn test_non_monotonic_schedule_rejected() {
    let text = format!("{MINIMAL}\n[poller]\nfast_interval_secs = 20\n");
    assert!(parse_config(&text).is_err());
  }
}
