//! Report and status types

use atomic_swap::{FillStatus, SwapRecord};
use chrono::{DateTime, Utc};
use portal_core::units::u128_string;
use portal_core::{BlockHeight, ChainStatus, Hash32, OverallStatus, Sats, SwapMode, TxId, UnixSecs, Wei};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Live view of a Bitcoin HTLC. `error` is set when the node could not be asked.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub status: ChainStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<Sats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_tx: Option<TxId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_tx: Option<TxId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_height: Option<BlockHeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_height: Option<BlockHeight>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Live view of an Ethereum escrow
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumView {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    pub status: ChainStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    /// Wei still held by the escrow
    #[serde(default, with = "opt_u128_string", skip_serializing_if = "Option::is_none")]
    pub balance: Option<Wei>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<UnixSecs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

mod opt_u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<u128>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(v) => serializer.serialize_str(&v.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u128>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|s| s.parse().map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CurrentStatus {
    pub bitcoin: BitcoinView,
    pub ethereum: EthereumView,
}

impl CurrentStatus {
    pub fn overall(&self) -> OverallStatus {
        portal_core::determine_overall_status(self.bitcoin.status, self.ethereum.status)
    }
}

/// Live status of one resolver's pair in a partial order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillDetails {
    pub resolver: String,
    pub range: String,
    pub percent: u32,
    pub current_status: CurrentStatus,
    pub status: OverallStatus,
    /// Published once the fill's escrow is claimed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub revealed_secret: Option<String>,
}

/// Persisted record merged with what the chains report right now
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapDetails {
    #[serde(skip)]
    pub record: SwapRecord,
    /// Redacted record as served to clients
    pub swap: Value,
    pub current_status: CurrentStatus,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub fills: Vec<FillDetails>,
    pub overall_status: OverallStatus,
    pub observed_at: DateTime<Utc>,
    /// Ethereum block time used for timeout arithmetic
    pub chain_time: UnixSecs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub txid: Option<TxId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Priority {
    High,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: String,
    pub reason: String,
}

// =============================================================================
// Reports
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSwap {
    pub id: String,
    pub order_id: String,
    pub mode: SwapMode,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preimage_hash: Option<Hash32>,
    pub phase: String,
    pub status: OverallStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinSection {
    pub htlc_address: Option<String>,
    pub funding_txid: Option<TxId>,
    /// Order amount in BTC
    pub amount: String,
    #[serde(flatten)]
    pub live: BitcoinView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumSection {
    pub escrow_address: Option<String>,
    pub funding_txid: Option<TxId>,
    /// Order amount in ETH
    pub amount: String,
    #[serde(flatten)]
    pub live: EthereumView,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillSummary {
    pub resolver: String,
    pub range: String,
    pub percent: u32,
    pub status: OverallStatus,
    pub bitcoin_amount: String,
    pub ethereum_amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialSection {
    pub merkle_root: Hash32,
    pub overall_filled: u32,
    pub fill_status: FillStatus,
    pub fills: Vec<FillSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapReport {
    pub report_id: String,
    pub generated_at: DateTime<Utc>,
    pub swap: ReportSwap,
    pub bitcoin: BitcoinSection,
    pub ethereum: EthereumSection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialSection>,
    pub timeline: Vec<TimelineEntry>,
    pub recommendations: Vec<Recommendation>,
}

/// Totals over every stored swap
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    pub total_swaps: usize,
    pub completed_swaps: usize,
    pub active_swaps: usize,
    pub pending_swaps: usize,
    pub failed_swaps: usize,
    pub refunded_swaps: usize,
    /// Sum over completed swaps, in BTC
    pub total_bitcoin_volume: String,
    /// Sum over completed swaps, in ETH
    pub total_ethereum_volume: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_completion_secs: Option<i64>,
}

/// Externally created swap handed in for tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackSwap {
    pub order_id: String,
    pub bitcoin_amount: Sats,
    #[serde(with = "u128_string")]
    pub ethereum_amount: Wei,
    pub user_address: String,
    #[serde(default)]
    pub mode: SwapMode,
    #[serde(default)]
    pub preimage_hash: Option<Hash32>,
    #[serde(default)]
    pub htlc_address: Option<String>,
    #[serde(default)]
    pub bitcoin_funding_txid: Option<TxId>,
    #[serde(default)]
    pub escrow_address: Option<String>,
    #[serde(default)]
    pub ethereum_funding_txid: Option<TxId>,
}

/// Client-facing JSON for a record.
///
/// The preimage appears only after the Ethereum claim made it public. Chunk
/// secrets are dropped; a fill's own secret is shown once that fill's
/// escrow was claimed.
pub fn public_record(record: &SwapRecord) -> Value {
    let mut value = match serde_json::to_value(record) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(swap_id = %record.swap_id, error = %e, "Record did not serialize");
            return Value::Null;
        }
    };

    if let Some(obj) = value.as_object_mut() {
        match record.revealed_preimage() {
            Some(p) => {
                obj.insert("preimage".into(), Value::String(p.to_hex()));
            }
            None => {
                obj.remove("preimage");
            }
        }
    }

    if let (Some(order), Some(partial)) = (&record.partial, value.get_mut("partial")) {
        if let Some(obj) = partial.as_object_mut() {
            obj.remove("secrets");
        }
        if let Some(fills) = partial.get_mut("fills").and_then(Value::as_array_mut) {
            for (fill, json) in order.fills.iter().zip(fills.iter_mut()) {
                let revealed = fill
                    .legs
                    .ethereum
                    .claim_tx
                    .as_ref()
                    .and_then(|_| order.secret(fill.secret_index).ok());
                if let (Some(secret), Some(obj)) = (revealed, json.as_object_mut()) {
                    obj.insert("revealedSecret".into(), Value::String(secret.to_hex()));
                }
            }
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::{Secret, SwapId};

    fn record() -> SwapRecord {
        let mut r = SwapRecord::new(
            SwapId::new("swap_1_o"),
            "o",
            SwapMode::Simple,
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
            100_000,
            10_000_000_000_000_000,
            Utc::now(),
        );
        let secret = Secret::from_bytes([5u8; 32]);
        r.preimage_hash = Some(secret.hashlock());
        r.preimage = Some(secret);
        r
    }

    #[test]
    fn test_preimage_hidden_until_revealed() {
        let mut r = record();
        let json = public_record(&r);
        assert!(json.get("preimage").is_none());
        assert!(json.get("preimageHash").is_some());
        assert_eq!(json["ethereumAmount"], "10000000000000000");

        r.legs.ethereum.claim_tx = Some(TxId::new("0xclaim"));
        let json = public_record(&r);
        assert_eq!(json["preimage"], hex_of(5));
    }

    fn hex_of(byte: u8) -> String {
        Secret::from_bytes([byte; 32]).to_hex()
    }

    #[test]
    fn test_eth_view_balance_as_string() {
        let view = EthereumView {
            status: ChainStatus::Funded,
            balance: Some(10u128.pow(19)),
            ..Default::default()
        };
        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["balance"], "10000000000000000000");
        assert_eq!(json["status"], "FUNDED");
        let back: EthereumView = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }
}
