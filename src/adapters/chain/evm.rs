//! EVM Chain Adapter - JSON-RPC Reads, Local Signing, Raw Broadcast
//!
//! Talks to the node exclusively through an `RpcTransport` (normally the
//! caching provider) and signs locally with an alloy `EthereumWallet`.
//! Transactions are EIP-1559 when the overrides carry 1559 pricing and
//! legacy otherwise.

use std::str::FromStr;
use std::sync::Arc;

use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::primitives::{Address, Bytes, U256, keccak256};
use alloy::rpc::types::TransactionRequest;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::domain::error::is_already_known;
use crate::domain::fees::{FeeData, FeePricing};
use crate::ports::chain::{
    ChainAdapter, ChainError, ChainFamily, ContractCall, ReceiptStatus, SendRequest,
};
use crate::ports::rpc::{RpcCall, RpcTransport};

/// Adapter for one EVM chain.
pub struct EvmAdapter {
    chain_id: u64,
    transport: Arc<dyn RpcTransport>,
    wallet: EthereumWallet,
}

impl EvmAdapter {
    /// Create an adapter without touching the network.
    pub fn new(chain_id: u64, transport: Arc<dyn RpcTransport>, wallet: EthereumWallet) -> Self {
        Self {
            chain_id,
            transport,
            wallet,
        }
    }

    /// Create an adapter and check the node serves the expected chain.
    #[instrument(skip_all, fields(chain_id = chain_id))]
    pub async fn connect(
        chain_id: u64,
        transport: Arc<dyn RpcTransport>,
        wallet: EthereumWallet,
    ) -> Result<Self> {
        let reported = transport
            .request("eth_chainId", json!([]))
            .await
            .context("Failed to query chain ID")?;
        let reported = parse_u64(&reported).context("Malformed eth_chainId response")?;

        if reported != chain_id {
            anyhow::bail!("Expected chain_id={chain_id}, node reports {reported}");
        }

        info!(chain_id, url = %transport.identity(), "Connected to EVM RPC");
        Ok(Self::new(chain_id, transport, wallet))
    }

    async fn pending_nonce(&self, account: Address) -> Result<u64, ChainError> {
        let value = self
            .transport
            .request("eth_getTransactionCount", json!([account, "pending"]))
            .await?;
        parse_u64(&value)
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64, ChainError> {
        let value = self.transport.request("eth_estimateGas", json!([tx])).await?;
        parse_u64(&value)
    }

    async fn gas_price(&self) -> Result<u128, ChainError> {
        let value = self.transport.request("eth_gasPrice", json!([])).await?;
        parse_u128(&value)
    }
}

#[async_trait]
impl ChainAdapter for EvmAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Evm
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn provider_id(&self) -> String {
        self.transport.identity()
    }

    fn account_address(&self, address: &Address) -> String {
        address.to_checksum(None)
    }

    async fn get_nonce(&self, account: &str) -> Result<Option<u64>, ChainError> {
        let account = parse_address(account)?;
        self.pending_nonce(account).await.map(Some)
    }

    async fn get_balance(&self, account: &str) -> Result<U256, ChainError> {
        let account = parse_address(account)?;
        let value = self
            .transport
            .request("eth_getBalance", json!([account, "latest"]))
            .await?;
        parse_u256(&value)
    }

    /// Gas price, priority fee and the latest base fee.
    ///
    /// `maxFeePerGas = 2 × baseFee + priorityFee`; chains without a base
    /// fee (or without `eth_maxPriorityFeePerGas`) only get a gas price.
    #[instrument(skip(self), fields(chain_id = self.chain_id))]
    async fn get_fee_data(&self) -> Result<FeeData, ChainError> {
        let (gas_price, priority, block) = tokio::join!(
            self.transport.request("eth_gasPrice", json!([])),
            self.transport.request("eth_maxPriorityFeePerGas", json!([])),
            self.transport
                .request("eth_getBlockByNumber", json!(["latest", false])),
        );

        let gas_price = parse_u128(&gas_price?)?;
        let base_fee = block
            .ok()
            .and_then(|b| b.get("baseFeePerGas").cloned())
            .and_then(|v| parse_u128(&v).ok());
        let priority = priority.ok().and_then(|v| parse_u128(&v).ok());

        let fee = match (base_fee, priority) {
            (Some(base), Some(tip)) => FeeData {
                gas_price: Some(gas_price),
                max_fee_per_gas: Some(base.saturating_mul(2).saturating_add(tip)),
                max_priority_fee_per_gas: Some(tip),
            },
            _ => FeeData {
                gas_price: Some(gas_price),
                ..FeeData::default()
            },
        };

        debug!(?fee, "Fetched fee data");
        Ok(fee)
    }

    #[instrument(skip(self, request), fields(chain_id = self.chain_id, from = %request.from, nonce = ?request.nonce))]
    async fn send_transaction(&self, request: &SendRequest) -> Result<String, ChainError> {
        let from = parse_address(&request.from)?;
        let to = parse_address(&request.to)?;

        let nonce = match request.nonce {
            Some(nonce) => nonce,
            None => self.pending_nonce(from).await?,
        };

        let mut tx = TransactionRequest::default()
            .with_from(from)
            .with_to(to)
            .with_value(request.value)
            .with_input(request.data.clone())
            .with_nonce(nonce)
            .with_chain_id(self.chain_id);

        tx = match request.overrides.pricing {
            Some(FeePricing::Eip1559 {
                max_fee_per_gas,
                max_priority_fee_per_gas,
            }) => tx
                .with_max_fee_per_gas(max_fee_per_gas)
                .with_max_priority_fee_per_gas(max_priority_fee_per_gas),
            Some(FeePricing::Legacy { gas_price }) => tx.with_gas_price(gas_price),
            None => {
                let gas_price = self.gas_price().await?;
                tx.with_gas_price(gas_price)
            }
        };

        let gas_limit = match request.overrides.gas_limit {
            Some(limit) => limit,
            None => self.estimate_gas(&tx).await?,
        };
        tx = tx.with_gas_limit(gas_limit);

        let envelope = tx
            .build(&self.wallet)
            .await
            .map_err(|e| ChainError::Signer(e.to_string()))?;
        let raw = Bytes::from(envelope.encoded_2718());
        let local_hash = keccak256(&raw).to_string();

        let hash = match self
            .transport
            .request("eth_sendRawTransaction", json!([raw]))
            .await
        {
            Ok(hash) => hash
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ChainError::Decode(format!("unexpected tx hash: {hash}")))?,
            // The node holds these exact bytes already; the nonce is spent
            // by this transaction and nothing else.
            Err(e) if is_already_known(&e.to_string()) => {
                warn!(hash = %local_hash, "Node already knows transaction");
                local_hash
            }
            Err(e) => return Err(e.into()),
        };

        info!(hash = %hash, nonce, gas_limit, "Transaction broadcast");
        Ok(hash)
    }

    async fn get_receipt(&self, hash: &str) -> Result<Option<ReceiptStatus>, ChainError> {
        let receipt = self
            .transport
            .request("eth_getTransactionReceipt", json!([hash]))
            .await?;

        if receipt.is_null() {
            return Ok(None);
        }

        match receipt.get("status").and_then(Value::as_str) {
            Some("0x1") => Ok(Some(ReceiptStatus::success())),
            Some("0x0") => Ok(Some(ReceiptStatus::failure("Transaction reverted"))),
            // Pre-Byzantium receipts carry no status; inclusion is all we know.
            _ => Ok(Some(ReceiptStatus::success())),
        }
    }

    async fn call_batch(&self, calls: &[ContractCall]) -> Result<Vec<Bytes>, ChainError> {
        let mut batch = Vec::with_capacity(calls.len());
        for call in calls {
            let to = parse_address(&call.to)?;
            batch.push(RpcCall::new(
                "eth_call",
                json!([{ "to": to, "data": call.data }, "latest"]),
            ));
        }

        self.transport
            .batch(batch)
            .await?
            .into_iter()
            .map(|result| {
                let value = result?;
                parse_bytes(&value)
            })
            .collect()
    }

    async fn is_healthy(&self) -> bool {
        self.transport
            .request("eth_blockNumber", json!([]))
            .await
            .is_ok()
    }

    async fn clear_cache(&self) {
        self.transport.clear_cache().await;
    }
}

fn parse_address(value: &str) -> Result<Address, ChainError> {
    Address::from_str(value.trim()).map_err(|e| ChainError::Decode(format!("bad address {value}: {e}")))
}

fn quantity(value: &Value) -> Result<&str, ChainError> {
    value
        .as_str()
        .map(|s| s.trim_start_matches("0x"))
        .ok_or_else(|| ChainError::Decode(format!("expected hex quantity, got {value}")))
}

fn parse_u64(value: &Value) -> Result<u64, ChainError> {
    let hex = quantity(value)?;
    u64::from_str_radix(hex, 16).map_err(|e| ChainError::Decode(e.to_string()))
}

fn parse_u128(value: &Value) -> Result<u128, ChainError> {
    let hex = quantity(value)?;
    u128::from_str_radix(hex, 16).map_err(|e| ChainError::Decode(e.to_string()))
}

fn parse_u256(value: &Value) -> Result<U256, ChainError> {
    let hex = quantity(value)?;
    U256::from_str_radix(hex, 16).map_err(|e| ChainError::Decode(e.to_string()))
}

fn parse_bytes(value: &Value) -> Result<Bytes, ChainError> {
    let hex = value
        .as_str()
        .ok_or_else(|| ChainError::Decode(format!("expected hex data, got {value}")))?;
    Bytes::from_str(hex).map_err(|e| ChainError::Decode(e.to_string()))
}
