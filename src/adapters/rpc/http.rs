//! JSON-RPC HTTP Transport - Retrying, Concurrency-limited Node Client
//!
//! Wraps reqwest with bounded concurrency and exponential-backoff retries
//! for all JSON-RPC interactions with a chain node. Only transport-level
//! failures (connection errors, HTTP 429, HTTP 5xx) are retried; a
//! JSON-RPC error object is an answer and is returned as is, including
//! when a node wraps it in a 4xx status.
//!
//! Broadcasts are not idempotent from the caller's point of view: once a
//! request may have reached the node, a failure is reported instead of
//! re-sent.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use super::types::{JsonRpcRequest, JsonRpcResponse};
use crate::ports::rpc::{RpcCall, RpcError, RpcTransport};

/// Configuration for the HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Node endpoint.
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Maximum concurrent requests.
    pub max_concurrent: usize,
    /// Maximum retries on transient errors.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub retry_base_delay: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:8545".to_string(),
            timeout: Duration::from_secs(30),
            max_concurrent: 16,
            max_retries: 3,
            retry_base_delay: Duration::from_millis(200),
        }
    }
}

/// Methods whose effect must not be repeated after an ambiguous failure.
const BROADCAST_METHODS: &[&str] = &["eth_sendRawTransaction", "eth_sendTransaction"];

fn is_broadcast(method: &str) -> bool {
    BROADCAST_METHODS.contains(&method)
}

/// JSON-RPC transport over HTTP.
pub struct HttpTransport {
    http: Client,
    config: HttpTransportConfig,
    semaphore: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl HttpTransport {
    /// Create a new transport.
    pub fn new(config: HttpTransportConfig) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(8)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        Ok(Self {
            http,
            config,
            semaphore,
            next_id: AtomicU64::new(1),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// POST a JSON body with retries; returns the decoded JSON response.
    ///
    /// With `idempotent` unset, only failures that prove the request never
    /// reached the node (rate limiting, refused connections) are retried.
    async fn post_with_retry<B: Serialize + Sync>(
        &self,
        body: &B,
        idempotent: bool,
    ) -> Result<Value, RpcError> {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| RpcError::Transport("transport closed".into()))?;

        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = self.config.retry_base_delay * 2u32.pow(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis(), "Retrying RPC request");
                sleep(delay).await;
            }

            match self.http.post(&self.config.url).json(body).send().await {
                Ok(response) => match response.status() {
                    status if status.is_success() => {
                        return response
                            .json::<Value>()
                            .await
                            .map_err(|e| RpcError::Decode(e.to_string()));
                    }
                    StatusCode::TOO_MANY_REQUESTS => {
                        warn!(url = %self.config.url, "Rate limited by node, backing off");
                        last_error = Some(RpcError::Transport("rate limited".into()));
                    }
                    status if status.is_server_error() => {
                        let error = RpcError::Transport(format!("server error: {status}"));
                        if !idempotent {
                            warn!(status = %status, "Node server error on broadcast, not retrying");
                            return Err(error);
                        }
                        warn!(status = %status, "Node server error, retrying");
                        last_error = Some(error);
                    }
                    status => {
                        let body = response.text().await.unwrap_or_default();
                        return match serde_json::from_str::<Value>(&body) {
                            Ok(value) if is_json_rpc_reply(&value) => Ok(value),
                            _ => Err(RpcError::Transport(format!("HTTP {status}: {body}"))),
                        };
                    }
                },
                Err(e) => {
                    let error = RpcError::Transport(e.to_string());
                    if !idempotent && !e.is_connect() {
                        warn!(error = %e, "Broadcast outcome unknown, not retrying");
                        return Err(error);
                    }
                    warn!(error = %e, attempt, "RPC request failed");
                    last_error = Some(error);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| RpcError::Transport("max retries exceeded".into())))
    }
}

/// Whether a non-2xx body still carries a JSON-RPC answer.
fn is_json_rpc_reply(value: &Value) -> bool {
    match value {
        Value::Object(fields) => fields.contains_key("error") || fields.contains_key("result"),
        Value::Array(items) => !items.is_empty() && items.iter().all(is_json_rpc_reply),
        _ => false,
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    fn identity(&self) -> String {
        self.config.url.clone()
    }

    #[instrument(skip(self, params), fields(url = %self.config.url))]
    async fn request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let request = JsonRpcRequest::new(self.next_id(), method, &params);
        let body = self.post_with_retry(&request, !is_broadcast(method)).await?;
        let response: JsonRpcResponse =
            serde_json::from_value(body).map_err(|e| RpcError::Decode(e.to_string()))?;
        response.into_result()
    }

    #[instrument(skip(self, calls), fields(url = %self.config.url, size = calls.len()))]
    async fn batch(&self, calls: Vec<RpcCall>) -> Result<Vec<Result<Value, RpcError>>, RpcError> {
        if calls.is_empty() {
            return Ok(Vec::new());
        }

        let first_id = self.next_id.fetch_add(calls.len() as u64, Ordering::Relaxed);
        let requests: Vec<JsonRpcRequest<'_>> = calls
            .iter()
            .enumerate()
            .map(|(i, call)| JsonRpcRequest::new(first_id + i as u64, &call.method, &call.params))
            .collect();

        let idempotent = !calls.iter().any(|call| is_broadcast(&call.method));
        let body = self.post_with_retry(&requests, idempotent).await?;
        let responses: Vec<JsonRpcResponse> =
            serde_json::from_value(body).map_err(|e| RpcError::Decode(e.to_string()))?;

        // Nodes may answer a batch in any order.
        let mut slots: Vec<Option<Result<Value, RpcError>>> = vec![None; calls.len()];
        for response in responses {
            let Some(index) = response
                .id
                .and_then(|id| id.checked_sub(first_id))
                .and_then(|i| usize::try_from(i).ok())
                .filter(|i| *i < slots.len())
            else {
                continue;
            };
            slots[index] = Some(response.into_result());
        }

        Ok(slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(RpcError::Decode("missing batch response".into()))))
            .collect())
    }
}
