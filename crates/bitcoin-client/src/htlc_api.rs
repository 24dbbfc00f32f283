//! Client for the HTLC micro-API (script construction, claim and refund)

use std::time::Duration;

use portal_core::{Chain, ChainError, ChainResult, Hash32, Secret, TxId};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

const API_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize)]
pub struct CreateHtlcRequest {
    pub preimage_hash: String,
    pub user_public_key: String,
    pub timeout_blocks: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateHtlcResponse {
    pub htlc_address: String,
    #[serde(default)]
    pub script_hash: Option<String>,
    #[serde(default)]
    pub htlc_script: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClaimHtlcRequest {
    pub order_id: String,
    pub preimage: String,
    pub htlc_address: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundHtlcRequest {
    pub order_id: String,
    pub htlc_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpendResponse {
    #[serde(alias = "transaction_id")]
    pub txid: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct HtlcApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HtlcApiClient {
    pub fn new(base_url: &str, api_key: &str) -> ChainResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("thunder-portal")
            .timeout(API_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| ChainError::rpc(Chain::Bitcoin, e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub async fn create(
        &self,
        hashlock: &Hash32,
        user_public_key: &str,
        timeout_blocks: u64,
    ) -> ChainResult<CreateHtlcResponse> {
        let request = CreateHtlcRequest {
            preimage_hash: hashlock.to_hex(),
            user_public_key: user_public_key.to_string(),
            timeout_blocks,
        };
        self.post("/htlc/create", &request).await
    }

    pub async fn claim(&self, order_id: &str, address: &str, preimage: &Secret) -> ChainResult<TxId> {
        let request = ClaimHtlcRequest {
            order_id: order_id.to_string(),
            preimage: preimage.to_hex(),
            htlc_address: address.to_string(),
        };
        let response: SpendResponse = self.post("/htlc/claim", &request).await?;
        Ok(TxId::new(response.txid))
    }

    pub async fn refund(&self, order_id: &str, address: &str) -> ChainResult<TxId> {
        let request = RefundHtlcRequest {
            order_id: order_id.to_string(),
            htlc_address: address.to_string(),
        };
        let response: SpendResponse = self.post("/htlc/refund", &request).await?;
        Ok(TxId::new(response.txid))
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> ChainResult<T>
    where
        B: Serialize + ?Sized,
        T: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| ChainError::rpc(Chain::Bitcoin, format!("{}: {}", path, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(map_status(path, status, &text));
        }

        response
            .json()
            .await
            .map_err(|e| ChainError::rpc(Chain::Bitcoin, format!("{}: bad response: {}", path, e)))
    }
}

fn map_status(path: &str, status: StatusCode, body: &str) -> ChainError {
    let detail = serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|b| match (b.code, b.message) {
            (Some(code), Some(msg)) => Some(format!("{}: {}", code, msg)),
            (_, Some(msg)) => Some(msg),
            (Some(code), None) => Some(code),
            (None, None) => None,
        })
        .unwrap_or_else(|| body.to_string());
    let message = format!("{} returned {}: {}", path, status, detail);

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => ChainError::Script { message },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChainError::Validation { message },
        StatusCode::NOT_FOUND => ChainError::NotFound { what: message },
        StatusCode::CONFLICT => ChainError::InvalidState { reason: message },
        _ => ChainError::rpc(Chain::Bitcoin, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spend_response_accepts_both_field_names() {
        let a: SpendResponse = serde_json::from_str(r#"{"txid":"ab"}"#).unwrap();
        let b: SpendResponse =
            serde_json::from_str(r#"{"transaction_id":"cd","status":"broadcast"}"#).unwrap();
        assert_eq!(a.txid, "ab");
        assert_eq!(b.txid, "cd");
    }

    #[test]
    fn test_status_mapping() {
        let err = map_status(
            "/htlc/create",
            StatusCode::BAD_REQUEST,
            r#"{"code":"INVALID_USER_PUBKEY","message":"Invalid user public key format"}"#,
        );
        match err {
            ChainError::Script { message } => assert!(message.contains("INVALID_USER_PUBKEY")),
            other => panic!("unexpected {:?}", other),
        }

        let err = map_status("/htlc/claim", StatusCode::CONFLICT, "already spent");
        assert!(matches!(err, ChainError::InvalidState { .. }));

        let err = map_status("/htlc/claim", StatusCode::BAD_GATEWAY, "");
        assert!(err.is_transient());
    }

    #[test]
    fn test_create_request_shape() {
        let req = CreateHtlcRequest {
            preimage_hash: "00".repeat(32),
            user_public_key: "02ab".into(),
            timeout_blocks: 144,
        };
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["timeout_blocks"], 144);
        assert!(v.get("preimage_hash").is_some());
        assert!(v.get("user_public_key").is_some());
    }
}
