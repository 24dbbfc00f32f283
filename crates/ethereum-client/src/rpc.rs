//! Ethereum JSON-RPC transport

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use portal_core::{Chain, ChainError, ChainResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

/// Transaction submitted through the node-managed signer
#[derive(Debug, Clone, Serialize)]
pub struct TransactionRequest {
    pub from: String,
    pub to: String,
    pub data: String,
    pub value: String,
    pub gas: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionReceipt {
    pub transaction_hash: String,
    #[serde(default)]
    pub block_number: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub logs: Vec<Value>,
}

impl TransactionReceipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_deref() == Some("0x1")
    }
}

/// Why a call failed, before the adapter maps it to a domain error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallFailure {
    /// Contract reverted; carries the reason string when the node returns one
    Reverted(String),
    NonceTooLow(String),
    /// Any other node-side JSON-RPC error
    Node(String),
    /// Connection, timeout or decoding failure
    Transport(ChainError),
}

impl CallFailure {
    /// Default mapping. Adapter operations refine `Reverted` using what
    /// they know about the contract being called.
    pub fn into_chain_error(self) -> ChainError {
        match self {
            CallFailure::Reverted(reason) => ChainError::InvalidState { reason },
            CallFailure::NonceTooLow(msg) | CallFailure::Node(msg) => {
                ChainError::rpc(Chain::Ethereum, msg)
            }
            CallFailure::Transport(e) => e,
        }
    }
}

#[derive(Debug)]
pub struct EthRpcClient {
    http: reqwest::Client,
    url: String,
    next_id: AtomicU64,
}

impl EthRpcClient {
    pub fn new(url: &str) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("thunder-portal")
            .timeout(RPC_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::rpc(Chain::Ethereum, e.to_string()))?;
        Ok(Self {
            http,
            url: url.to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    /// Call that keeps revert reasons and nonce errors distinguishable
    pub async fn call_checked<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, CallFailure> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let transport = |msg: String| CallFailure::Transport(ChainError::rpc(Chain::Ethereum, msg));

        let response = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(format!("{}: {}", method, e)))?;

        let parsed: RpcResponse = response
            .json()
            .await
            .map_err(|e| transport(format!("{}: bad response: {}", method, e)))?;

        if let Some(err) = parsed.error {
            return Err(classify_failure(&err));
        }

        serde_json::from_value(parsed.result.unwrap_or(Value::Null))
            .map_err(|e| transport(format!("{}: unexpected response: {}", method, e)))
    }

    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<T> {
        self.call_checked(method, params)
            .await
            .map_err(CallFailure::into_chain_error)
    }

    pub async fn accounts(&self) -> ChainResult<Vec<String>> {
        self.call("eth_accounts", json!([])).await
    }

    /// Read-only contract call at the latest block
    pub async fn eth_call(&self, to: &str, data: &str) -> ChainResult<String> {
        self.call("eth_call", json!([{ "to": to, "data": data }, "latest"]))
            .await
    }

    pub async fn pending_nonce(&self, address: &str) -> ChainResult<u64> {
        let hex: String = self
            .call("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        Ok(crate::abi::parse_quantity(&hex)? as u64)
    }

    pub async fn receipt(&self, tx_hash: &str) -> ChainResult<Option<TransactionReceipt>> {
        self.call("eth_getTransactionReceipt", json!([tx_hash])).await
    }

    pub async fn latest_timestamp(&self) -> ChainResult<u64> {
        let block: Value = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        let ts = block
            .get("timestamp")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ChainError::rpc(Chain::Ethereum, "latest block has no timestamp"))?;
        Ok(crate::abi::parse_quantity(ts)? as u64)
    }

    pub async fn block_number(&self) -> ChainResult<u64> {
        let hex: String = self.call("eth_blockNumber", json!([])).await?;
        Ok(crate::abi::parse_quantity(&hex)? as u64)
    }

    /// All logs emitted by `address` since genesis
    pub async fn logs(&self, address: &str) -> ChainResult<Vec<Value>> {
        self.call(
            "eth_getLogs",
            json!([{ "address": address, "fromBlock": "0x0", "toBlock": "latest" }]),
        )
        .await
    }
}

fn classify_failure(body: &RpcErrorBody) -> CallFailure {
    let lower = body.message.to_lowercase();
    if lower.contains("nonce too low") || lower.contains("nonce has already been used") {
        return CallFailure::NonceTooLow(body.message.clone());
    }
    if lower.contains("revert") || body.code == 3 {
        return CallFailure::Reverted(revert_reason(&body.message));
    }
    CallFailure::Node(format!("({}) {}", body.code, body.message))
}

fn revert_reason(message: &str) -> String {
    const MARKERS: [&str; 2] = ["reverted with reason string", "execution reverted:"];
    for marker in MARKERS {
        if let Some((_, rest)) = message.split_once(marker) {
            let reason = rest.trim().trim_matches('\'').trim();
            if !reason.is_empty() {
                return reason.to_string();
            }
        }
    }
    message.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(code: i64, message: &str) -> RpcErrorBody {
        RpcErrorBody {
            code,
            message: message.to_string(),
            data: None,
        }
    }

    #[test]
    fn test_classify_revert_reason() {
        let f = classify_failure(&body(3, "execution reverted: Invalid preimage"));
        assert_eq!(f, CallFailure::Reverted("Invalid preimage".into()));

        let f = classify_failure(&body(
            -32603,
            "Error: VM Exception while processing transaction: reverted with reason string 'Already claimed'",
        ));
        assert_eq!(f, CallFailure::Reverted("Already claimed".into()));
    }

    #[test]
    fn test_classify_nonce() {
        let f = classify_failure(&body(-32000, "nonce too low"));
        assert!(matches!(f, CallFailure::NonceTooLow(_)));
    }

    #[test]
    fn test_classify_other() {
        let f = classify_failure(&body(-32601, "method not found"));
        assert!(matches!(f, CallFailure::Node(_)));
        assert!(f.into_chain_error().is_transient());
    }

    #[test]
    fn test_receipt_status() {
        let r: TransactionReceipt = serde_json::from_value(json!({
            "transactionHash": "0xab",
            "blockNumber": "0x10",
            "status": "0x1",
            "logs": []
        }))
        .unwrap();
        assert!(r.succeeded());
    }
}
