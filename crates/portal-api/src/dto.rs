//! Data Transfer Objects for API requests and responses

use atomic_swap::{
    ChunkRange, FillRecord, FillStatus, RecordedError, ResolverAssignment, SwapError, SwapPhase,
    SwapRecord,
};
use axum::{http::StatusCode, Json};
use portal_core::{
    format_btc, format_eth, parse_btc, parse_eth, Backend, BlockHeight, Hash32, OverallStatus,
    Sats, SwapId, SwapMode, TxId, UnixSecs, Wei,
};
use serde::{Deserialize, Serialize};

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: Backend,
    pub uptime_secs: u64,
}

impl HealthResponse {
    pub fn new(backend: Backend, uptime_secs: u64) -> Self {
        Self {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend,
            uptime_secs,
        }
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Generic API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new("bad_request", message)
    }
}

/// Error half of every handler result
pub type ApiFailure = (StatusCode, Json<ApiError>);

pub type ApiResult<T> = Result<Json<T>, ApiFailure>;

/// Map a coordinator error onto its HTTP status and stable code
pub fn swap_failure(e: SwapError) -> ApiFailure {
    let status =
        StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut body = ApiError::new(e.error_code(), e.to_string());
    match &e {
        SwapError::TimelockActive { chain, until } => {
            body = body.with_details(serde_json::json!({ "chain": chain, "until": until }));
        }
        SwapError::InvalidTransition { from, to } => {
            body = body.with_details(serde_json::json!({ "from": from, "to": to }));
        }
        _ => {}
    }
    if status.is_server_error() {
        tracing::error!(code = e.error_code(), error = %e, "Request failed");
    }
    (status, Json(body))
}

pub fn bad_request(message: impl Into<String>) -> ApiFailure {
    (StatusCode::BAD_REQUEST, Json(ApiError::bad_request(message)))
}

/// Swap id from a request path
pub fn path_swap_id(raw: &str) -> Result<SwapId, ApiFailure> {
    SwapId::parse(raw).map_err(|e| swap_failure(e.into()))
}

// ============================================================================
// Swap execution
// ============================================================================

/// Decimal amount as sent by clients: a string or a plain JSON number
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AmountInput {
    Text(String),
    Number(serde_json::Number),
}

impl AmountInput {
    /// Decimal text, parsed later with exact fixed-point rules
    pub fn as_decimal(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

/// POST /execute-real-swap[-with-lop|-partial-swap] body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSwapRequest {
    pub order_id: String,
    /// BTC, decimal
    pub bitcoin_amount: AmountInput,
    /// ETH, decimal
    pub ethereum_amount: AmountInput,
    #[serde(default)]
    pub user_address: Option<String>,
    /// Partial swaps only; four default resolvers otherwise
    #[serde(default)]
    pub resolvers: Option<Vec<ResolverAssignment>>,
}

impl ExecuteSwapRequest {
    /// Amounts in base units
    pub fn amounts(&self) -> Result<(Sats, Wei), ApiFailure> {
        let bitcoin = parse_btc(&self.bitcoin_amount.as_decimal())
            .map_err(|e| bad_request(format!("bitcoinAmount: {}", e)))?;
        let ethereum = parse_eth(&self.ethereum_amount.as_decimal())
            .map_err(|e| bad_request(format!("ethereumAmount: {}", e)))?;
        if bitcoin == 0 || ethereum == 0 {
            return Err(bad_request("Amounts must be positive"));
        }
        Ok((bitcoin, ethereum))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinLegResponse {
    pub htlc_address: Option<String>,
    pub amount: String,
    pub timeout_height: Option<BlockHeight>,
    pub funding_txid: Option<TxId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumLegResponse {
    pub escrow_address: Option<String>,
    pub amount: String,
    pub order_hash: Option<Hash32>,
    pub timeout: Option<UnixSecs>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillResponse {
    pub resolver: String,
    pub range: ChunkRange,
    pub secret_index: u32,
    pub hashlock: Hash32,
    pub phase: SwapPhase,
    pub htlc_address: Option<String>,
    pub escrow_address: Option<String>,
}

impl From<&FillRecord> for FillResponse {
    fn from(fill: &FillRecord) -> Self {
        Self {
            resolver: fill.resolver.clone(),
            range: fill.range,
            secret_index: fill.secret_index,
            hashlock: fill.hashlock,
            phase: fill.legs.phase,
            htlc_address: fill.legs.bitcoin.htlc_address.clone(),
            escrow_address: fill.legs.ethereum.escrow_address.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialResponse {
    pub merkle_root: Hash32,
    pub overall_filled: u32,
    pub fill_status: FillStatus,
    pub fills: Vec<FillResponse>,
}

/// Result of opening a swap
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteSwapResponse {
    pub swap_id: SwapId,
    pub order_id: String,
    pub mode: SwapMode,
    pub phase: SwapPhase,
    pub overall_status: OverallStatus,
    pub preimage_hash: Option<Hash32>,
    pub bitcoin: BitcoinLegResponse,
    pub ethereum: EthereumLegResponse,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialResponse>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RecordedError>,
    pub instructions: Vec<String>,
}

impl From<&SwapRecord> for ExecuteSwapResponse {
    fn from(record: &SwapRecord) -> Self {
        let legs = &record.legs;
        Self {
            swap_id: record.swap_id.clone(),
            order_id: record.order_id.clone(),
            mode: record.mode,
            phase: legs.phase,
            overall_status: record.overall_status,
            preimage_hash: record.preimage_hash,
            bitcoin: BitcoinLegResponse {
                htlc_address: legs.bitcoin.htlc_address.clone(),
                amount: format_btc(record.bitcoin_amount),
                timeout_height: legs.bitcoin.timeout_height,
                funding_txid: legs.bitcoin.funding_txid.clone(),
            },
            ethereum: EthereumLegResponse {
                escrow_address: legs.ethereum.escrow_address.clone(),
                amount: format_eth(record.ethereum_amount),
                order_hash: legs.ethereum.order_hash,
                timeout: legs.ethereum.timeout,
            },
            partial: record.partial.as_ref().map(|order| PartialResponse {
                merkle_root: order.merkle_root,
                overall_filled: order.overall_filled(),
                fill_status: order.fill_status(),
                fills: order.fills.iter().map(FillResponse::from).collect(),
            }),
            last_error: legs.last_error.clone(),
            instructions: instructions(record),
        }
    }
}

/// Next steps for the client, by where the swap stands
pub fn instructions(record: &SwapRecord) -> Vec<String> {
    let id = record.swap_id.as_str();
    let complete = format!("POST /api/swaps/{}/complete to reveal the secret and claim both legs", id);
    let refund = format!("POST /api/swaps/{}/refund once the timelocks expire", id);
    let report = format!("GET /api/reports/swaps/{} for live chain status", id);

    match record.phase() {
        SwapPhase::EthereumFunded => vec![complete, report],
        SwapPhase::BothClaimed => vec![report],
        SwapPhase::TimeoutRefunded => vec![report],
        SwapPhase::PreimageRevealed => vec![complete, report],
        SwapPhase::Error => vec![refund, report],
        _ if record.partial.is_some() => vec![complete, refund, report],
        _ => vec![
            "Bitcoin funding is not confirmed yet; retry completion later".to_string(),
            refund,
            report,
        ],
    }
}

// ============================================================================
// Reports
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

/// GET /api/reports/swaps response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapListResponse {
    pub count: usize,
    pub swaps: Vec<serde_json::Value>,
}

/// GET /relayer/active-swaps response
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveSwapsResponse {
    pub count: usize,
    pub swaps: Vec<atomic_swap::WatchInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::{Chain, ChainError};

    #[test]
    fn test_amounts_accept_strings_and_numbers() {
        let req: ExecuteSwapRequest = serde_json::from_value(serde_json::json!({
            "orderId": "o-1",
            "bitcoinAmount": 0.001,
            "ethereumAmount": "0.01",
            "userAddress": "0x70997970C51812dc3A010C7d01b50e0d17dc79C8"
        }))
        .unwrap();
        assert_eq!(req.amounts().unwrap(), (100_000, 10_000_000_000_000_000));
    }

    #[test]
    fn test_amounts_reject_garbage_and_zero() {
        let req: ExecuteSwapRequest = serde_json::from_value(serde_json::json!({
            "orderId": "o-1",
            "bitcoinAmount": "abc",
            "ethereumAmount": "0.01"
        }))
        .unwrap();
        let (status, body) = req.amounts().unwrap_err();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.message.starts_with("bitcoinAmount"));

        let req = ExecuteSwapRequest {
            bitcoin_amount: AmountInput::Text("0".into()),
            ..req
        };
        assert!(req.amounts().is_err());
    }

    #[test]
    fn test_swap_failure_mapping() {
        let (status, body) = swap_failure(SwapError::NotFound("x".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body.code, "not_found");

        let (status, body) = swap_failure(SwapError::TimelockActive {
            chain: Chain::Bitcoin,
            until: 245,
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body.details.as_ref().unwrap()["until"], 245);

        let (status, body) = swap_failure(
            ChainError::PreimageMismatch {
                hashlock: "ab".into(),
            }
            .into(),
        );
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body.code, "preimage_mismatch");

        let (_, body) = swap_failure(SwapError::RangeConflict {
            lo: 0,
            hi: 5,
            reason: "overlaps".into(),
        });
        assert!(body.details.is_none());
    }
}
