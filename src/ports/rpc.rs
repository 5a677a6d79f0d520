//! RPC Transport Port - Raw JSON-RPC Interface
//!
//! The lowest seam towards a chain node. The caching provider wraps one
//! transport and is itself a transport, so adapters never know whether
//! they talk to the wire or to the cache.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Errors from a JSON-RPC round trip.
///
/// `Clone` so a single in-flight result can be handed to every caller
/// that coalesced onto it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
  /// Connection, timeout or HTTP-level failure.
  #[error("transport error: {0}")]
  Transport(String),
  /// The node answered with a JSON-RPC error object.
  #[error("rpc error {code}: {message}")]
  Server {
    /// JSON-RPC error code.
    code: i64,
    /// Node-provided message.
    message: String,
  },
  /// The response could not be decoded.
  #[error("decode error: {0}")]
  Decode(String),
}

impl RpcError {
  /// Whether retrying the same request may succeed.
  pub const fn is_transient(&self) -> bool {
    matches!(self, Self::Transport(_))
  }
}

/// One call inside a JSON-RPC batch.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcCall {
  /// Method name, e.g. `eth_call`.
  pub method: String,
  /// Positional params.
  pub params: Value,
}

impl RpcCall {
  /// Build a call from a method name and params.
  pub fn new(method: impl Into<String>, params: Value) -> Self {
    Self {
      method: method.into(),
      params,
    }
  }
}

/// Trait for JSON-RPC transports.
#[async_trait]
pub trait RpcTransport: Send + Sync + 'static {
  /// Stable identity of the endpoint (its URL), used to key caches.
  fn identity(&self) -> String;

  /// Send a single request and return its `result`.
  async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError>;

  /// Send several requests at once.
  ///
  /// The outer error is a failure of the whole batch; inner results are
  /// per call, in the order given. The default issues calls one by one.
  async fn batch(&self, calls: Vec<RpcCall>) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
    let mut results = Vec::with_capacity(calls.len());
    for call in calls {
      results.push(self.request(&call.method, call.params).await);
    }
    Ok(results)
  }

  /// Drop any cached responses. Transports without a cache ignore this.
  async fn clear_cache(&self) {}
}
