//! JSON-RPC 2.0 Envelope Types
//!
//! Serialization types for single and batch JSON-RPC requests.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ports::rpc::RpcError;

/// Outgoing request envelope.
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest<'a> {
  pub jsonrpc: &'static str,
  pub id: u64,
  pub method: &'a str,
  pub params: &'a Value,
}

impl<'a> JsonRpcRequest<'a> {
  pub const fn new(id: u64, method: &'a str, params: &'a Value) -> Self {
    Self {
      jsonrpc: "2.0",
      id,
      method,
      params,
    }
  }
}

/// Error object inside a response.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcErrorObject {
  pub code: i64,
  pub message: String,
  #[serde(default)]
  pub data: Option<Value>,
}

/// Incoming response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcResponse {
  #[serde(default)]
  pub id: Option<u64>,
  #[serde(default)]
  pub result: Option<Value>,
  #[serde(default)]
  pub error: Option<JsonRpcErrorObject>,
}

impl JsonRpcResponse {
  /// Collapse the envelope into the call result.
  ///
  /// A missing `result` without an error is a JSON `null` (e.g. a receipt
  /// that does not exist yet).
  pub fn into_result(self) -> Result<Value, RpcError> {
    match self.error {
      Some(err) => {
        let message = match err.data {
          Some(Value::String(data)) if !data.is_empty() => format!("{}: {data}", err.message),
          _ => err.message,
        };
        Err(RpcError::Server {
          code: err.code,
          message,
        })
      }
      None => Ok(self.result.unwrap_or(Value::Null)),
    }
  }
}
