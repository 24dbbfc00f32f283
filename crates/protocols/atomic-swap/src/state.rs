//! Swap lifecycle state and persisted records

use std::fmt;

use chrono::{DateTime, Utc};
use portal_core::units::u128_string;
use portal_core::{
    determine_overall_status, BlockHeight, ChainStatus, Hash32, OverallStatus, Sats, Secret,
    SwapId, SwapMode, TxId, UnixSecs, Wei,
};
use serde::{Deserialize, Serialize};

use crate::error::{SwapError, SwapResult};
use crate::partial::PartialOrder;

// =============================================================================
// Phases
// =============================================================================

/// Coordinator state machine. Steps are strictly sequential; the two escape
/// phases are reachable from any non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapPhase {
    Initiated,
    BitcoinHtlcCreated,
    BitcoinFunded,
    EthereumEscrowCreated,
    EthereumFunded,
    PreimageRevealed,
    BothClaimed,
    TimeoutRefunded,
    Error,
}

impl SwapPhase {
    /// The happy path in order
    pub const SEQUENCE: [SwapPhase; 7] = [
        SwapPhase::Initiated,
        SwapPhase::BitcoinHtlcCreated,
        SwapPhase::BitcoinFunded,
        SwapPhase::EthereumEscrowCreated,
        SwapPhase::EthereumFunded,
        SwapPhase::PreimageRevealed,
        SwapPhase::BothClaimed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "INITIATED",
            Self::BitcoinHtlcCreated => "BITCOIN_HTLC_CREATED",
            Self::BitcoinFunded => "BITCOIN_FUNDED",
            Self::EthereumEscrowCreated => "ETHEREUM_ESCROW_CREATED",
            Self::EthereumFunded => "ETHEREUM_FUNDED",
            Self::PreimageRevealed => "PREIMAGE_REVEALED",
            Self::BothClaimed => "BOTH_CLAIMED",
            Self::TimeoutRefunded => "TIMEOUT_REFUNDED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::BothClaimed | Self::TimeoutRefunded | Self::Error)
    }

    /// Position on the happy path; escape phases have none
    pub fn step(&self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|p| p == self)
    }

    pub fn next(&self) -> Option<SwapPhase> {
        self.step().and_then(|i| Self::SEQUENCE.get(i + 1)).copied()
    }

    pub fn can_transition(&self, to: SwapPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        match to {
            SwapPhase::TimeoutRefunded | SwapPhase::Error => true,
            _ => self.next() == Some(to),
        }
    }

    /// Leg statuses implied by reaching this phase on the happy path
    pub fn leg_statuses(&self) -> Option<(ChainStatus, ChainStatus)> {
        use ChainStatus::*;
        match self {
            Self::Initiated => Some((Pending, Pending)),
            Self::BitcoinHtlcCreated => Some((Created, Pending)),
            Self::BitcoinFunded => Some((Funded, Pending)),
            Self::EthereumEscrowCreated => Some((Funded, Created)),
            Self::EthereumFunded => Some((Funded, Funded)),
            Self::PreimageRevealed => Some((Funded, Claimed)),
            Self::BothClaimed => Some((Claimed, Claimed)),
            Self::TimeoutRefunded | Self::Error => None,
        }
    }
}

impl fmt::Display for SwapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Legs
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BitcoinLeg {
    pub htlc_address: Option<String>,
    pub script_hash: Option<String>,
    pub hashlock: Option<Hash32>,
    pub timeout_height: Option<BlockHeight>,
    pub funding_txid: Option<TxId>,
    pub claim_tx: Option<TxId>,
    pub refund_tx: Option<TxId>,
    pub status: ChainStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EthereumLeg {
    pub escrow_address: Option<String>,
    pub order_hash: Option<Hash32>,
    pub hashlock: Option<Hash32>,
    /// Unix seconds after which the escrow is refundable
    pub timeout: Option<UnixSecs>,
    pub lop_txid: Option<TxId>,
    pub create_txid: Option<TxId>,
    pub funding_txid: Option<TxId>,
    pub claim_tx: Option<TxId>,
    pub refund_tx: Option<TxId>,
    pub status: ChainStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseEvent {
    pub phase: SwapPhase,
    pub at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub txid: Option<TxId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedError {
    pub code: String,
    pub details: String,
}

impl From<&SwapError> for RecordedError {
    fn from(e: &SwapError) -> Self {
        Self {
            code: e.error_code().to_string(),
            details: e.to_string(),
        }
    }
}

/// One HTLC/escrow pair and the phase it has reached.
///
/// A simple swap has exactly one; a partial order has one per fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegPair {
    pub phase: SwapPhase,
    pub bitcoin: BitcoinLeg,
    pub ethereum: EthereumLeg,
    pub events: Vec<PhaseEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<RecordedError>,
}

impl LegPair {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            phase: SwapPhase::Initiated,
            bitcoin: BitcoinLeg::default(),
            ethereum: EthereumLeg::default(),
            events: vec![PhaseEvent {
                phase: SwapPhase::Initiated,
                at,
                txid: None,
            }],
            last_error: None,
        }
    }

    /// Move to `to`, recording the event. Illegal moves leave the pair untouched.
    pub fn advance(&mut self, to: SwapPhase, txid: Option<TxId>, at: DateTime<Utc>) -> SwapResult<()> {
        if !self.phase.can_transition(to) {
            return Err(SwapError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.phase = to;
        self.events.push(PhaseEvent { phase: to, at, txid });
        Ok(())
    }

    /// Terminal failure with the error kept for the status surface
    pub fn fail(&mut self, error: &SwapError, at: DateTime<Utc>) {
        self.last_error = Some(error.into());
        if self.phase.can_transition(SwapPhase::Error) {
            self.phase = SwapPhase::Error;
            self.events.push(PhaseEvent {
                phase: SwapPhase::Error,
                at,
                txid: None,
            });
        }
    }

    /// A failed pair still reports REFUNDED once its locked funds came back
    pub fn overall_status(&self) -> OverallStatus {
        let from_legs = determine_overall_status(self.bitcoin.status, self.ethereum.status);
        match self.phase {
            SwapPhase::Error if from_legs != OverallStatus::Refunded => OverallStatus::Error,
            SwapPhase::TimeoutRefunded => OverallStatus::Refunded,
            _ => from_legs,
        }
    }

    /// Funds this pair still holds on Bitcoin
    pub fn bitcoin_locked(&self) -> bool {
        self.bitcoin.funding_txid.is_some()
            && !matches!(self.bitcoin.status, ChainStatus::Claimed | ChainStatus::Refunded)
    }

    /// Funds this pair still holds on Ethereum
    pub fn ethereum_locked(&self) -> bool {
        self.ethereum.funding_txid.is_some()
            && !matches!(self.ethereum.status, ChainStatus::Claimed | ChainStatus::Refunded)
    }
}

// =============================================================================
// Records
// =============================================================================

/// Persisted swap, one per `swap_<millis>_<orderId>` key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRecord {
    pub swap_id: SwapId,
    pub order_id: String,
    pub mode: SwapMode,
    pub user_address: String,
    pub bitcoin_amount: Sats,
    #[serde(with = "u128_string")]
    pub ethereum_amount: Wei,
    /// Kept so `complete` can resume after a restart; never served before reveal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preimage: Option<Secret>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preimage_hash: Option<Hash32>,
    #[serde(flatten)]
    pub legs: LegPair,
    pub overall_status: OverallStatus,
    #[serde(default)]
    pub abandoned: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial: Option<PartialOrder>,
}

impl SwapRecord {
    pub fn new(
        swap_id: SwapId,
        order_id: &str,
        mode: SwapMode,
        user_address: &str,
        bitcoin_amount: Sats,
        ethereum_amount: Wei,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            swap_id,
            order_id: order_id.to_string(),
            mode,
            user_address: user_address.to_string(),
            bitcoin_amount,
            ethereum_amount,
            preimage: None,
            preimage_hash: None,
            legs: LegPair::new(at),
            overall_status: OverallStatus::Pending,
            abandoned: false,
            created_at: at,
            updated_at: at,
            completed_at: None,
            partial: None,
        }
    }

    pub fn phase(&self) -> SwapPhase {
        self.legs.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.legs.phase.is_terminal()
    }

    /// Recompute the stored overall status after a mutation
    pub fn refresh(&mut self, at: DateTime<Utc>) {
        self.overall_status = match &self.partial {
            Some(order) => order.overall_status(),
            None => self.legs.overall_status(),
        };
        if self.overall_status == OverallStatus::Completed && self.completed_at.is_none() {
            self.completed_at = Some(at);
        }
        self.updated_at = at;
    }

    /// The preimage once it is public on Ethereum
    pub fn revealed_preimage(&self) -> Option<&Secret> {
        self.legs.ethereum.claim_tx.as_ref().and(self.preimage.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn test_happy_path_sequence() {
        let mut pair = LegPair::new(now());
        for to in &SwapPhase::SEQUENCE[1..] {
            pair.advance(*to, None, now()).unwrap();
        }
        assert_eq!(pair.phase, SwapPhase::BothClaimed);
        assert_eq!(pair.events.len(), SwapPhase::SEQUENCE.len());
    }

    #[test]
    fn test_no_skipping_or_reordering() {
        let mut pair = LegPair::new(now());
        let err = pair.advance(SwapPhase::EthereumEscrowCreated, None, now()).unwrap_err();
        assert_eq!(
            err,
            SwapError::InvalidTransition {
                from: SwapPhase::Initiated,
                to: SwapPhase::EthereumEscrowCreated,
            }
        );
        assert_eq!(pair.phase, SwapPhase::Initiated);

        pair.advance(SwapPhase::BitcoinHtlcCreated, None, now()).unwrap();
        assert!(pair.advance(SwapPhase::Initiated, None, now()).is_err());
    }

    #[test]
    fn test_escape_transitions() {
        for phase in &SwapPhase::SEQUENCE[..6] {
            assert!(phase.can_transition(SwapPhase::TimeoutRefunded), "{}", phase);
            assert!(phase.can_transition(SwapPhase::Error), "{}", phase);
        }
        for terminal in [SwapPhase::BothClaimed, SwapPhase::TimeoutRefunded, SwapPhase::Error] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition(SwapPhase::Error));
            assert!(!terminal.can_transition(SwapPhase::TimeoutRefunded));
        }
    }

    #[test]
    fn test_fail_records_error() {
        let mut pair = LegPair::new(now());
        pair.fail(&SwapError::validation("bad"), now());
        assert_eq!(pair.phase, SwapPhase::Error);
        assert_eq!(pair.overall_status(), OverallStatus::Error);
        assert_eq!(pair.last_error.as_ref().unwrap().code, "validation_error");
    }

    #[test]
    fn test_record_json_shape() {
        let mut record = SwapRecord::new(
            SwapId::new("swap_1_order"),
            "order",
            SwapMode::Simple,
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
            100_000,
            10_000_000_000_000_000,
            now(),
        );
        record.preimage = Some(Secret::from_bytes([7u8; 32]));
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["swapId"], "swap_1_order");
        assert_eq!(json["phase"], "INITIATED");
        assert_eq!(json["ethereumAmount"], "10000000000000000");
        assert_eq!(json["bitcoin"]["status"], "PENDING");
        assert!(json.get("preimage").is_some());

        let back: SwapRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
        assert!(back.revealed_preimage().is_none());
    }
}
