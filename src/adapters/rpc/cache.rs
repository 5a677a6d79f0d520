//! RPC Cache Provider - Deduplicating, TTL-bounded JSON-RPC Front
//!
//! Wraps a raw transport and is itself a transport. Methods fall into
//! three tiers:
//! - cacheable reads (fee and chain metadata): coalesced and cached for a
//!   short TTL
//! - dedup-only reads (balances, nonces, receipts, calls): concurrent
//!   identical calls are merged, nothing is kept afterwards
//! - everything else (sends, logs, unknown methods): straight to the wire
//!
//! Keys are structural: the method name plus a canonical rendering of the
//! params, so `["0xABC","latest"]` and `["0xabc","latest"]` share an entry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, instrument};

use super::coalesce::{Coalescer, LookupSource};
use crate::adapters::metrics::MetricsRegistry;
use crate::ports::rpc::{RpcCall, RpcError, RpcTransport};

/// Default lifetime of a cached read.
pub const DEFAULT_TTL: Duration = Duration::from_secs(2);

/// Default number of cached entries.
pub const DEFAULT_CAPACITY: usize = 200;

const CACHEABLE: &[&str] = &[
  "eth_chainId",
  "net_version",
  "eth_gasPrice",
  "eth_maxPriorityFeePerGas",
  "eth_feeHistory",
  "eth_blobBaseFee",
];

const DEDUP_ONLY: &[&str] = &[
  "eth_getBalance",
  "eth_getTransactionCount",
  "eth_getCode",
  "eth_call",
  "eth_estimateGas",
  "eth_getTransactionReceipt",
  "eth_getTransactionByHash",
  "eth_getBlockByNumber",
  "eth_blockNumber",
];

/// How a method is treated by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTier {
  /// Coalesced and cached for the TTL.
  Cacheable,
  /// Coalesced only.
  DedupOnly,
  /// Never coalesced.
  PassThrough,
}

/// Classify a JSON-RPC method.
pub fn classify(method: &str) -> MethodTier {
  if CACHEABLE.contains(&method) {
    MethodTier::Cacheable
  } else if DEDUP_ONLY.contains(&method) {
    MethodTier::DedupOnly
  } else {
    MethodTier::PassThrough
  }
}

/// Structural key for `(method, params)`.
///
/// Object keys are sorted (serde_json maps are ordered) and hex strings are
/// lower-cased; everything else is rendered as compact JSON.
pub fn cache_key(method: &str, params: &Value) -> String {
  let mut key = String::with_capacity(method.len() + 64);
  key.push_str(method);
  key.push(':');
  write_canonical(params, &mut key);
  key
}

fn write_canonical(value: &Value, out: &mut String) {
  match value {
    Value::String(s) if s.starts_with("0x") || s.starts_with("0X") => {
      out.push('"');
      out.push_str(&s.to_ascii_lowercase());
      out.push('"');
    }
    Value::Array(items) => {
      out.push('[');
      for (i, item) in items.iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        write_canonical(item, out);
      }
      out.push(']');
    }
    Value::Object(map) => {
      let mut keys: Vec<&String> = map.keys().collect();
      keys.sort();
      out.push('{');
      for (i, k) in keys.into_iter().enumerate() {
        if i > 0 {
          out.push(',');
        }
        out.push_str(&Value::String(k.clone()).to_string());
        out.push(':');
        write_canonical(&map[k], out);
      }
      out.push('}');
    }
    other => out.push_str(&other.to_string()),
  }
}

/// Caching provider in front of one transport.
pub struct RpcCacheProvider {
  inner: Arc<dyn RpcTransport>,
  coalescer: Coalescer<String, Value, RpcError>,
  ttl: Duration,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl RpcCacheProvider {
  /// Wrap `inner` with the given TTL and capacity.
  pub fn new(inner: Arc<dyn RpcTransport>, ttl: Duration, capacity: usize) -> Self {
    Self {
      inner,
      coalescer: Coalescer::new(capacity),
      ttl,
      metrics: None,
    }
  }

  /// Count lookups per method and source.
  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Drop every cached read (e.g. after the provider was replaced).
  pub async fn clear(&self) {
    self.coalescer.clear().await;
  }

  /// Number of cached entries.
  pub async fn cached_entries(&self) -> usize {
    self.coalescer.len().await
  }

  fn record(&self, method: &str, source: &str) {
    if let Some(metrics) = &self.metrics {
      metrics.rpc_requests.with_label_values(&[method, source]).inc();
    }
  }
}

#[async_trait]
impl RpcTransport for RpcCacheProvider {
  fn identity(&self) -> String {
    self.inner.identity()
  }

  #[instrument(skip(self, params), level = "debug")]
  async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
    let ttl = match classify(method) {
      MethodTier::PassThrough => {
        self.record(method, "passthrough");
        return self.inner.request(method, params).await;
      }
      MethodTier::Cacheable => Some(self.ttl),
      MethodTier::DedupOnly => None,
    };

    let key = cache_key(method, &params);
    let inner = Arc::clone(&self.inner);
    let owned_method = method.to_string();

    let (result, source) = self
      .coalescer
      .get_or_fetch(key, ttl, move || async move {
        inner.request(&owned_method, params).await
      })
      .await;

    if source != LookupSource::Network {
      debug!(method, source = source.as_str(), "RPC answered without a new call");
    }
    self.record(method, source.as_str());
    result
  }

  /// Batches go straight through; their members are usually distinct
  /// contract reads that gain nothing from coalescing.
  async fn batch(&self, calls: Vec<RpcCall>) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
    for call in &calls {
      self.record(&call.method, "passthrough");
    }
    self.inner.batch(calls).await
  }

  async fn clear_cache(&self) {
    self.clear().await;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_classification() {
    assert_eq!(classify("eth_gasPrice"), MethodTier::Cacheable);
    assert_eq!(classify("eth_getBalance"), MethodTier::DedupOnly);
    assert_eq!(classify("eth_sendRawTransaction"), MethodTier::PassThrough);
    assert_eq!(classify("eth_getLogs"), MethodTier::PassThrough);
  }

  #[test]
  fn test_key_normalizes_hex_case() {
    let a = cache_key("eth_getBalance", &json!(["0xABCdef", "latest"]));
    let b = cache_key("eth_getBalance", &json!(["0xabcdef", "latest"]));
    assert_eq!(a, b);
    assert_ne!(a, cache_key("eth_getBalance", &json!(["0xabcdef", "pending"])));
  }

  #[test]
  fn test_key_is_order_independent_for_objects() {
    let a = cache_key("eth_call", &json!([{"to": "0x01", "data": "0xAA"}, "latest"]));
    let b = cache_key("eth_call", &json!([{"data": "0xaa", "to": "0x01"}, "latest"]));
    assert_eq!(a, b);
  }

  #[test]
  fn test_key_distinguishes_methods() {
    assert_ne!(
      cache_key("eth_gasPrice", &json!([])),
      cache_key("eth_chainId", &json!([]))
    );
  }
}
