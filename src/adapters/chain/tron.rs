//! TRON Chain Adapter - REST+JSON Node API
//!
//! TRON nodes (java-tron / TronGrid) expose a REST API instead of JSON-RPC.
//! Transactions are created server-side, their `txID` is signed locally and
//! the signed body is broadcast back. Addresses travel base58check with
//! `visible: true`; TRON has no account nonce.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use alloy::hex;
use alloy::primitives::{Address, B256, Bytes, U256};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::{debug, info, instrument, warn};

use crate::domain::fees::FeeData;
use crate::ports::chain::{
    ChainAdapter, ChainError, ChainFamily, ContractCall, ReceiptStatus, SendRequest,
};
use crate::ports::signer::HashSigner;

/// Version byte of TRON mainnet addresses.
const TRON_ADDRESS_PREFIX: u8 = 0x41;

/// Energy cap for contract calls, in sun (100 TRX).
const DEFAULT_FEE_LIMIT: u64 = 100_000_000;

/// TRON form of an EVM address: base58check(`0x41` ‖ address).
pub fn tron_address(address: &Address) -> String {
    let mut payload = Vec::with_capacity(21);
    payload.push(TRON_ADDRESS_PREFIX);
    payload.extend_from_slice(address.as_slice());
    bs58::encode(payload).with_check().into_string()
}

/// Parse a base58check TRON address back into its 20-byte form.
pub fn parse_tron_address(value: &str) -> Result<Address, ChainError> {
    let payload = bs58::decode(value.trim())
        .with_check(None)
        .into_vec()
        .map_err(|e| ChainError::Decode(format!("bad TRON address {value}: {e}")))?;

    match payload.split_first() {
        Some((&TRON_ADDRESS_PREFIX, rest)) if rest.len() == 20 => Ok(Address::from_slice(rest)),
        _ => Err(ChainError::Decode(format!("bad TRON address {value}"))),
    }
}

/// Accept either form; `0x…` hex addresses are converted to base58.
fn to_visible(value: &str) -> Result<String, ChainError> {
    let value = value.trim();
    if value.starts_with("0x") {
        let address = Address::from_str(value)
            .map_err(|e| ChainError::Decode(format!("bad address {value}: {e}")))?;
        Ok(tron_address(&address))
    } else {
        parse_tron_address(value)?;
        Ok(value.to_string())
    }
}

/// Adapter for a TRON network.
pub struct TronAdapter {
    chain_id: u64,
    base_url: String,
    http: Client,
    api_key: Option<String>,
    signer: Arc<dyn HashSigner>,
}

impl TronAdapter {
    /// Create an adapter for `base_url` (e.g. `https://api.trongrid.io`).
    pub fn new(
        chain_id: u64,
        base_url: impl Into<String>,
        api_key: Option<String>,
        signer: Arc<dyn HashSigner>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {e}"))?;

        Ok(Self {
            chain_id,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            api_key,
            signer,
        })
    }

    /// Address of the local signer in TRON form.
    pub fn signer_address(&self) -> String {
        tron_address(&self.signer.address())
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, ChainError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("TRON-PRO-API-KEY", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ChainError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(ChainError::Transport(format!("HTTP {status} from {path}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChainError::Rejected(format!("HTTP {status}: {text}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ChainError::Decode(e.to_string()))?;

        if let Some(error) = value.get("Error").and_then(Value::as_str) {
            return Err(ChainError::Rejected(error.to_string()));
        }
        Ok(value)
    }

    /// Create an unsigned transaction for `request`.
    async fn create_transaction(&self, request: &SendRequest) -> Result<Value, ChainError> {
        let owner = to_visible(&request.from)?;
        let to = to_visible(&request.to)?;
        let amount = u64::try_from(request.value)
            .map_err(|_| ChainError::Rejected("amount exceeds TRON range".into()))?;

        if request.data.is_empty() {
            return self
                .post(
                    "/wallet/createtransaction",
                    json!({
                        "owner_address": owner,
                        "to_address": to,
                        "amount": amount,
                        "visible": true,
                    }),
                )
                .await;
        }

        let response = self
            .post(
                "/wallet/triggersmartcontract",
                json!({
                    "owner_address": owner,
                    "contract_address": to,
                    "data": hex::encode(&request.data),
                    "call_value": amount,
                    "fee_limit": request.overrides.gas_limit.unwrap_or(DEFAULT_FEE_LIMIT),
                    "visible": true,
                }),
            )
            .await?;

        if let Some(reason) = failed_result(&response) {
            return Err(ChainError::Rejected(reason));
        }
        response
            .get("transaction")
            .cloned()
            .ok_or_else(|| ChainError::Decode("missing transaction in trigger response".into()))
    }
}

/// Failure reason of a `{result: {result, message}}` response, if it failed.
fn failed_result(response: &Value) -> Option<String> {
    let result = response.get("result")?;
    if result.get("result").and_then(Value::as_bool) == Some(true) {
        return None;
    }
    Some(
        result
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| "transaction rejected".to_string(), decode_message),
    )
}

/// TRON error messages are hex-encoded UTF-8.
fn decode_message(message: &str) -> String {
    hex::decode(message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| message.to_string())
}

#[async_trait]
impl ChainAdapter for TronAdapter {
    fn family(&self) -> ChainFamily {
        ChainFamily::Tron
    }

    fn chain_id(&self) -> u64 {
        self.chain_id
    }

    fn provider_id(&self) -> String {
        self.base_url.clone()
    }

    fn account_address(&self, address: &Address) -> String {
        tron_address(address)
    }

    async fn get_nonce(&self, _account: &str) -> Result<Option<u64>, ChainError> {
        Ok(None)
    }

    async fn get_balance(&self, account: &str) -> Result<U256, ChainError> {
        let account = to_visible(account)?;
        let response = self
            .post("/wallet/getaccount", json!({ "address": account, "visible": true }))
            .await?;
        // Accounts that never received TRX come back as `{}`.
        let balance = response.get("balance").and_then(Value::as_u64).unwrap_or(0);
        Ok(U256::from(balance))
    }

    /// TRON prices bandwidth/energy itself; there is nothing to scale.
    async fn get_fee_data(&self) -> Result<FeeData, ChainError> {
        Ok(FeeData::default())
    }

    #[instrument(skip(self, request), fields(chain_id = self.chain_id, from = %request.from))]
    async fn send_transaction(&self, request: &SendRequest) -> Result<String, ChainError> {
        let mut transaction = self.create_transaction(request).await?;

        let tx_id = transaction
            .get("txID")
            .and_then(Value::as_str)
            .ok_or_else(|| ChainError::Decode("missing txID".into()))?
            .to_string();
        let digest =
            B256::from_str(&tx_id).map_err(|e| ChainError::Decode(format!("bad txID: {e}")))?;

        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| ChainError::Signer(e.to_string()))?;

        if let Some(body) = transaction.as_object_mut() {
            body.insert("signature".into(), json!([hex::encode(signature)]));
        }

        let response = self
            .post("/wallet/broadcasttransaction", transaction)
            .await?;

        if response.get("result").and_then(Value::as_bool) != Some(true) {
            let reason = response
                .get("message")
                .and_then(Value::as_str)
                .map_or_else(|| "broadcast rejected".to_string(), decode_message);
            warn!(tx_id = %tx_id, reason = %reason, "TRON broadcast rejected");
            return Err(ChainError::Rejected(reason));
        }

        info!(hash = %tx_id, "Transaction broadcast");
        Ok(tx_id)
    }

    async fn get_receipt(&self, hash: &str) -> Result<Option<ReceiptStatus>, ChainError> {
        let info = self
            .post(
                "/wallet/gettransactioninfobyid",
                json!({ "value": hash.trim_start_matches("0x") }),
            )
            .await?;

        // Unknown or not yet solidified: `{}`.
        if info.get("id").is_none() {
            return Ok(None);
        }

        let receipt_result = info
            .get("receipt")
            .and_then(|r| r.get("result"))
            .and_then(Value::as_str);
        let failed = info.get("result").and_then(Value::as_str) == Some("FAILED");

        match receipt_result {
            Some("SUCCESS") | None if !failed => Ok(Some(ReceiptStatus::success())),
            other => {
                let reason = info
                    .get("resMessage")
                    .and_then(Value::as_str)
                    .map(decode_message)
                    .or_else(|| other.map(str::to_string))
                    .unwrap_or_else(|| "Transaction failed".to_string());
                Ok(Some(ReceiptStatus::failure(reason)))
            }
        }
    }

    async fn call_batch(&self, calls: &[ContractCall]) -> Result<Vec<Bytes>, ChainError> {
        let owner = self.signer_address();
        let requests = calls.iter().map(|call| {
            let owner = owner.clone();
            async move {
                let response = self
                    .post(
                        "/wallet/triggerconstantcontract",
                        json!({
                            "owner_address": owner,
                            "contract_address": to_visible(&call.to)?,
                            "data": hex::encode(&call.data),
                            "visible": true,
                        }),
                    )
                    .await?;

                if let Some(reason) = failed_result(&response) {
                    return Err(ChainError::Rejected(reason));
                }
                let output = response
                    .get("constant_result")
                    .and_then(|r| r.get(0))
                    .and_then(Value::as_str)
                    .ok_or_else(|| ChainError::Decode("missing constant_result".into()))?;
                hex::decode(output)
                    .map(Bytes::from)
                    .map_err(|e| ChainError::Decode(e.to_string()))
            }
        });

        futures_util::future::try_join_all(requests).await
    }

    async fn is_healthy(&self) -> bool {
        match self.post("/wallet/getnowblock", json!({})).await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "TRON health probe failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tron_address_round_trip() {
        let evm = Address::repeat_byte(0x5a);
        let tron = tron_address(&evm);
        assert!(tron.starts_with('T'));
        assert_eq!(parse_tron_address(&tron).unwrap(), evm);
    }

    #[test]
    fn test_known_tron_address() {
        // USDT contract on TRON mainnet.
        let evm = Address::from_str("0xa614f803b6fd780986a42c78ec9c7f77e6ded13c").unwrap();
        assert_eq!(tron_address(&evm), "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t");
    }

    #[test]
    fn test_rejects_bad_checksum() {
        assert!(parse_tron_address("TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6u").is_err());
    }

    #[test]
    fn test_hex_addresses_become_visible() {
        let hex_form = "0xa614f803b6fd780986a42c78ec9c7f77e6ded13c";
        assert_eq!(
            to_visible(hex_form).unwrap(),
            "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t"
        );
    }

    #[test]
    fn test_failed_trigger_result_is_decoded() {
        let response = json!({
            "result": { "code": "CONTRACT_VALIDATE_ERROR", "message": hex::encode("balance is not sufficient") }
        });
        assert_eq!(
            failed_result(&response).as_deref(),
            Some("balance is not sufficient")
        );
        assert_eq!(failed_result(&json!({ "result": { "result": true } })), None);
    }
}
