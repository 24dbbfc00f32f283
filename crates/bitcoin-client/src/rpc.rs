//! Bitcoin Core JSON-RPC client
//!
//! Basic Auth over HTTP. Wallet-scoped methods are routed to
//! `<url>/wallet/<wallet>`, everything else to the node root.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine};
use portal_core::{BitcoinConfig, Chain, ChainError, ChainResult, Sats, TxId, Utxo, SATS_PER_BTC};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

/// Timeout for a single node call
const RPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Methods that must be sent to the wallet endpoint
const WALLET_METHODS: &[&str] = &[
    "listunspent",
    "sendrawtransaction",
    "getnewaddress",
    "getbalance",
    "listwallets",
    "listtransactions",
    "importaddress",
    "gettransaction",
    "signrawtransactionwithwallet",
];

// Bitcoin Core error codes we map to something other than a transient RPC error
const RPC_MISC_ERROR: i64 = -1;
const RPC_TYPE_ERROR: i64 = -3;
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
const RPC_WALLET_INSUFFICIENT_FUNDS: i64 = -6;
const RPC_INVALID_PARAMETER: i64 = -8;
const RPC_DESERIALIZATION_ERROR: i64 = -22;
const RPC_VERIFY_ERROR: i64 = -25;
const RPC_VERIFY_REJECTED: i64 = -26;
const RPC_VERIFY_ALREADY_IN_CHAIN: i64 = -27;

#[derive(Debug, Deserialize)]
struct RpcResponse {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// Entry returned by `listunspent`
#[derive(Debug, Clone, Deserialize)]
pub struct UnspentEntry {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: Option<String>,
    pub amount: f64,
    pub confirmations: u32,
}

impl UnspentEntry {
    pub fn to_utxo(&self) -> Utxo {
        Utxo {
            txid: TxId::new(&self.txid),
            vout: self.vout,
            amount: btc_to_sats(self.amount),
            confirmations: self.confirmations,
        }
    }
}

/// Result of `signrawtransactionwithwallet`
#[derive(Debug, Clone, Deserialize)]
pub struct SignedTransaction {
    pub hex: String,
    pub complete: bool,
}

/// Node-reported amounts arrive as JSON floats with 8 decimals; rounding
/// recovers the exact satoshi value.
pub fn btc_to_sats(btc: f64) -> Sats {
    (btc * SATS_PER_BTC as f64).round() as Sats
}

#[derive(Clone)]
pub struct BitcoinRpcClient {
    http: reqwest::Client,
    url: String,
    wallet: String,
    auth_header: String,
}

impl BitcoinRpcClient {
    pub fn new(config: &BitcoinConfig) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("thunder-portal")
            .build()
            .map_err(|e| ChainError::rpc(Chain::Bitcoin, e.to_string()))?;
        let credentials = format!("{}:{}", config.rpc_user, config.rpc_password);
        Ok(Self {
            http,
            url: config.rpc_url.trim_end_matches('/').to_string(),
            wallet: config.wallet.clone(),
            auth_header: format!("Basic {}", STANDARD.encode(credentials)),
        })
    }

    fn endpoint(&self, method: &str) -> String {
        if !self.wallet.is_empty() && WALLET_METHODS.contains(&method) {
            format!("{}/wallet/{}", self.url, self.wallet)
        } else {
            self.url.clone()
        }
    }

    /// Raw JSON-RPC call
    pub async fn call_raw(&self, method: &str, params: Vec<Value>) -> ChainResult<Value> {
        let body = json!({
            "jsonrpc": "1.0",
            "id": "thunder-portal",
            "method": method,
            "params": params,
        });

        let request = self
            .http
            .post(self.endpoint(method))
            .header("Authorization", &self.auth_header)
            .json(&body)
            .send();

        let response = timed_request(request).await?;
        let status = response.status();

        // Bitcoin Core reports RPC errors with HTTP 500 and a JSON body
        let parsed: RpcResponse = response.json().await.map_err(|e| {
            ChainError::rpc(
                Chain::Bitcoin,
                format!("{} returned HTTP {}: {}", method, status, e),
            )
        })?;

        if let Some(err) = parsed.error {
            return Err(map_rpc_error(method, err));
        }

        parsed.result.ok_or_else(|| {
            ChainError::rpc(Chain::Bitcoin, format!("{}: no result in response", method))
        })
    }

    /// Typed JSON-RPC call
    pub async fn call<T: DeserializeOwned>(&self, method: &str, params: Vec<Value>) -> ChainResult<T> {
        let value = self.call_raw(method, params).await?;
        serde_json::from_value(value).map_err(|e| {
            ChainError::rpc(Chain::Bitcoin, format!("{}: unexpected response: {}", method, e))
        })
    }

    pub async fn get_block_count(&self) -> ChainResult<u64> {
        self.call("getblockcount", vec![]).await
    }

    pub async fn get_new_address(&self) -> ChainResult<String> {
        self.call("getnewaddress", vec![]).await
    }

    pub async fn get_balance(&self) -> ChainResult<Sats> {
        let btc: f64 = self.call("getbalance", vec![]).await?;
        Ok(btc_to_sats(btc))
    }

    pub async fn list_wallets(&self) -> ChainResult<Vec<String>> {
        self.call("listwallets", vec![]).await
    }

    /// Spendable wallet outputs, optionally filtered by address
    pub async fn list_unspent(
        &self,
        min_conf: u32,
        addresses: Option<&[String]>,
    ) -> ChainResult<Vec<UnspentEntry>> {
        let mut params = vec![json!(min_conf), json!(9_999_999)];
        if let Some(addrs) = addresses {
            params.push(json!(addrs));
        }
        self.call("listunspent", params).await
    }

    /// Build an unsigned transaction. Amounts go out as decimal strings.
    pub async fn create_raw_transaction(
        &self,
        inputs: &[Utxo],
        outputs: &[(String, Sats)],
    ) -> ChainResult<String> {
        let inputs: Vec<Value> = inputs
            .iter()
            .map(|u| json!({ "txid": u.txid.as_str(), "vout": u.vout }))
            .collect();
        let mut out = serde_json::Map::new();
        for (address, sats) in outputs {
            out.insert(address.clone(), json!(portal_core::format_btc(*sats)));
        }
        self.call("createrawtransaction", vec![json!(inputs), Value::Object(out)])
            .await
    }

    pub async fn sign_raw_transaction_with_wallet(&self, hex: &str) -> ChainResult<SignedTransaction> {
        self.call("signrawtransactionwithwallet", vec![json!(hex)])
            .await
    }

    pub async fn send_raw_transaction(&self, hex: &str) -> ChainResult<TxId> {
        let txid: String = self.call("sendrawtransaction", vec![json!(hex)]).await?;
        Ok(TxId::new(txid))
    }

    /// Verbose `getrawtransaction`
    pub async fn get_raw_transaction(&self, txid: &str) -> ChainResult<Value> {
        self.call_raw("getrawtransaction", vec![json!(txid), json!(true)])
            .await
    }

    pub async fn get_transaction(&self, txid: &str) -> ChainResult<Value> {
        self.call_raw("gettransaction", vec![json!(txid), json!(true)])
            .await
    }

    /// Watch-only import so `listtransactions` sees the HTLC address
    pub async fn import_address(&self, address: &str, label: &str) -> ChainResult<()> {
        self.call_raw(
            "importaddress",
            vec![json!(address), json!(label), json!(false)],
        )
        .await
        .map(|_| ())
    }

    pub async fn list_transactions(&self, label: &str, count: u32) -> ChainResult<Vec<Value>> {
        self.call(
            "listtransactions",
            vec![json!(label), json!(count), json!(0), json!(true)],
        )
        .await
    }

    /// Regtest only
    pub async fn generate_to_address(&self, blocks: u32, address: &str) -> ChainResult<Vec<String>> {
        self.call("generatetoaddress", vec![json!(blocks), json!(address)])
            .await
    }
}

fn map_rpc_error(method: &str, err: RpcErrorBody) -> ChainError {
    let message = format!("{} failed ({}): {}", method, err.code, err.message);
    match err.code {
        RPC_INVALID_ADDRESS_OR_KEY => ChainError::NotFound { what: message },
        RPC_WALLET_INSUFFICIENT_FUNDS => ChainError::InsufficientFunds {
            required: 0,
            available: 0,
        },
        RPC_TYPE_ERROR | RPC_INVALID_PARAMETER | RPC_MISC_ERROR => {
            ChainError::Validation { message }
        }
        RPC_DESERIALIZATION_ERROR
        | RPC_VERIFY_ERROR
        | RPC_VERIFY_REJECTED
        | RPC_VERIFY_ALREADY_IN_CHAIN => ChainError::Script { message },
        _ => ChainError::rpc(Chain::Bitcoin, message),
    }
}

async fn timed_request<T>(
    fut: impl std::future::Future<Output = Result<T, reqwest::Error>>,
) -> ChainResult<T> {
    tokio::time::timeout(RPC_REQUEST_TIMEOUT, fut)
        .await
        .map_err(|_| {
            ChainError::rpc(
                Chain::Bitcoin,
                format!(
                    "Node request timed out after {}s",
                    RPC_REQUEST_TIMEOUT.as_secs()
                ),
            )
        })?
        .map_err(|e| ChainError::rpc(Chain::Bitcoin, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(wallet: &str) -> BitcoinRpcClient {
        let config = BitcoinConfig {
            rpc_url: "http://localhost:18443/".into(),
            wallet: wallet.into(),
            ..BitcoinConfig::default()
        };
        BitcoinRpcClient::new(&config).unwrap()
    }

    #[test]
    fn test_wallet_routing() {
        let c = client("test_wallet");
        assert_eq!(
            c.endpoint("listunspent"),
            "http://localhost:18443/wallet/test_wallet"
        );
        assert_eq!(c.endpoint("getblockcount"), "http://localhost:18443");
        assert_eq!(c.endpoint("createrawtransaction"), "http://localhost:18443");

        let c = client("");
        assert_eq!(c.endpoint("listunspent"), "http://localhost:18443");
    }

    #[test]
    fn test_basic_auth_header() {
        let c = client("w");
        // base64("thunderportal:thunderportal123")
        assert_eq!(c.auth_header, "Basic dGh1bmRlcnBvcnRhbDp0aHVuZGVycG9ydGFsMTIz");
    }

    #[test]
    fn test_error_mapping() {
        let err = map_rpc_error(
            "getrawtransaction",
            RpcErrorBody {
                code: -5,
                message: "No such mempool or blockchain transaction".into(),
            },
        );
        assert!(matches!(err, ChainError::NotFound { .. }));

        let err = map_rpc_error(
            "sendrawtransaction",
            RpcErrorBody {
                code: -26,
                message: "non-mandatory-script-verify-flag".into(),
            },
        );
        assert!(matches!(err, ChainError::Script { .. }));

        let err = map_rpc_error(
            "getblockcount",
            RpcErrorBody {
                code: -28,
                message: "Loading block index".into(),
            },
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_btc_to_sats() {
        assert_eq!(btc_to_sats(0.001), 100_000);
        assert_eq!(btc_to_sats(0.00000001), 1);
        assert_eq!(btc_to_sats(50.0), 5_000_000_000);
    }
}
