//! JSON-RPC 2.0 client for an Ethereum node

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RpcError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Subset of a transaction receipt
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl TransactionReceipt {
    pub fn status_code(&self) -> Option<u64> {
        self.status.as_deref().and_then(|s| parse_quantity(s).ok()).map(|v| v as u64)
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number
            .as_deref()
            .and_then(|s| parse_quantity(s).ok())
            .map(|v| v as u64)
    }
}

/// Parse a hex quantity such as `0x1a`
pub fn parse_quantity(value: &str) -> Result<u128, RpcError> {
    let digits = value
        .strip_prefix("0x")
        .ok_or_else(|| RpcError::InvalidResponse(format!("quantity without 0x prefix: {}", value)))?;
    if digits.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(digits, 16)
        .map_err(|e| RpcError::InvalidResponse(format!("invalid quantity {}: {}", value, e)))
}

fn decode_hex_data(value: &str) -> Result<Vec<u8>, RpcError> {
    hex::decode(value.trim_start_matches("0x"))
        .map_err(|e| RpcError::InvalidResponse(format!("invalid hex data: {}", e)))
}

/// Ethereum JSON-RPC client
pub struct RpcClient {
    url: String,
    http: Client,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            url: url.into(),
            http,
            next_id: AtomicU64::new(1),
        }
    }

    /// Issue one request; `null` results decode into `Option` targets
    pub async fn request<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> Result<T, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        trace!(method = method, id = id, "RPC request");

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RpcError::Transport(format!("HTTP {} from RPC node", status)));
        }

        let payload: RpcResponse = response
            .json()
            .await
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;

        if let Some(error) = payload.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        serde_json::from_value(payload.result.unwrap_or(serde_json::Value::Null))
            .map_err(|e| RpcError::InvalidResponse(format!("{}: {}", method, e)))
    }

    async fn quantity(&self, method: &str, params: serde_json::Value) -> Result<u128, RpcError> {
        let value: String = self.request(method, params).await?;
        parse_quantity(&value)
    }

    /// `eth_call` at `latest`
    pub async fn call(&self, to: &str, data: &[u8]) -> Result<Vec<u8>, RpcError> {
        let value: String = self
            .request(
                "eth_call",
                json!([{ "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        decode_hex_data(&value)
    }

    pub async fn chain_id(&self) -> Result<u64, RpcError> {
        Ok(self.quantity("eth_chainId", json!([])).await? as u64)
    }

    /// Nonce including pending transactions
    pub async fn transaction_count(&self, address: &str) -> Result<u64, RpcError> {
        Ok(self
            .quantity("eth_getTransactionCount", json!([address, "pending"]))
            .await? as u64)
    }

    pub async fn gas_price(&self) -> Result<u128, RpcError> {
        self.quantity("eth_gasPrice", json!([])).await
    }

    pub async fn estimate_gas(&self, from: &str, to: &str, data: &[u8]) -> Result<u64, RpcError> {
        Ok(self
            .quantity(
                "eth_estimateGas",
                json!([{ "from": from, "to": to, "data": format!("0x{}", hex::encode(data)) }]),
            )
            .await? as u64)
    }

    /// Returns the transaction hash
    pub async fn send_raw_transaction(&self, raw: &[u8]) -> Result<String, RpcError> {
        self.request(
            "eth_sendRawTransaction",
            json!([format!("0x{}", hex::encode(raw))]),
        )
        .await
    }

    /// `None` while the transaction is not mined
    pub async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TransactionReceipt>, RpcError> {
        self.request("eth_getTransactionReceipt", json!([tx_hash])).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rpc_result(result: serde_json::Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": result}))
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert!(parse_quantity("26").is_err());
    }

    #[tokio::test]
    async fn test_call_decodes_hex() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({"method": "eth_call"})))
            .respond_with(rpc_result(json!("0x00ff")))
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri(), Duration::from_secs(5));
        assert_eq!(client.call("0xabc", &[1, 2]).await.unwrap(), vec![0x00, 0xff]);
    }

    #[tokio::test]
    async fn test_rpc_error_object() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1, "error": {"code": -32000, "message": "execution reverted"}
            })))
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri(), Duration::from_secs(5));
        let err = client.chain_id().await.unwrap_err();
        assert_eq!(
            err,
            RpcError::Rpc {
                code: -32000,
                message: "execution reverted".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_pending_receipt_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(serde_json::Value::Null))
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri(), Duration::from_secs(5));
        assert_eq!(client.transaction_receipt("0x01").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_receipt_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(rpc_result(json!({
                "transactionHash": "0xfeed", "blockNumber": "0x10", "status": "0x1"
            })))
            .mount(&server)
            .await;

        let client = RpcClient::new(server.uri(), Duration::from_secs(5));
        let receipt = client.transaction_receipt("0xfeed").await.unwrap().unwrap();
        assert_eq!(receipt.status_code(), Some(1));
        assert_eq!(receipt.block(), Some(16));
    }
}
