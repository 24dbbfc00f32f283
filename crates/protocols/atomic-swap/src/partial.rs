//! Partial fills: chunk ranges, resolver fills and the fill ledger
//!
//! An order is split into 100 chunks of 1%. Each resolver commits to a
//! contiguous range and runs its own HTLC/escrow pair locked with the
//! secret at the end of its range, so one resolver's secret never unlocks
//! another's funds.

use std::fmt;

use portal_core::units::u128_string;
use portal_core::{ChainStatus, Hash32, OverallStatus, Sats, Secret, Wei};
use serde::{Deserialize, Serialize};

use crate::error::{SwapError, SwapResult};
use crate::merkle;
use crate::secrets::{CHUNK_COUNT, FULL_FILL_INDEX};
use crate::state::{LegPair, SwapPhase};

const LAST_CHUNK: u32 = CHUNK_COUNT as u32 - 1;

/// Inclusive chunk index range `[lo, hi]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRange {
    pub lo: u32,
    pub hi: u32,
}

impl ChunkRange {
    pub fn new(lo: u32, hi: u32) -> SwapResult<Self> {
        if lo > hi || hi > LAST_CHUNK {
            return Err(SwapError::RangeConflict {
                lo,
                hi,
                reason: format!("range must satisfy lo <= hi <= {}", LAST_CHUNK),
            });
        }
        Ok(Self { lo, hi })
    }

    /// Fill percentage covered by this range
    pub fn percent(&self) -> u32 {
        self.hi - self.lo + 1
    }

    pub fn overlaps(&self, other: &ChunkRange) -> bool {
        self.lo <= other.hi && other.lo <= self.hi
    }

    /// Index of the secret that locks this range's pair
    pub fn secret_index(&self) -> u32 {
        if self.lo == 0 && self.hi == LAST_CHUNK {
            FULL_FILL_INDEX
        } else {
            self.hi
        }
    }
}

impl fmt::Display for ChunkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lo, self.hi)
    }
}

/// A resolver's commitment to a range, as requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverAssignment {
    pub name: String,
    /// Ethereum address that receives the escrow on claim
    pub address: String,
    pub range: ChunkRange,
}

impl ResolverAssignment {
    pub fn new(name: &str, address: &str, lo: u32, hi: u32) -> SwapResult<Self> {
        Ok(Self {
            name: name.to_string(),
            address: address.to_string(),
            range: ChunkRange::new(lo, hi)?,
        })
    }
}

/// Four competing resolvers covering the whole order
pub fn default_resolvers() -> Vec<ResolverAssignment> {
    [
        ("Resolver A", "0x70997970C51812dc3A010C7d01b50e0d17dc79C8", 0, 19),
        ("Resolver B", "0x3C44CdDdB6a900fa2b585dd299e03d12FA4293BC", 20, 44),
        ("Resolver C", "0x90F79bf6EB2c4f870365E785982E1f101E93b906", 45, 69),
        ("Resolver D", "0x15d34AAf54267DB7D7c367839AAf71A00a2C6A65", 70, 99),
    ]
    .into_iter()
    .map(|(name, address, lo, hi)| ResolverAssignment {
        name: name.to_string(),
        address: address.to_string(),
        range: ChunkRange { lo, hi },
    })
    .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FillStatus {
    Unfilled,
    PartiallyFilled,
    Filled,
}

impl FillStatus {
    pub fn from_percent(filled: u32) -> Self {
        match filled {
            0 => Self::Unfilled,
            f if f >= CHUNK_COUNT as u32 => Self::Filled,
            _ => Self::PartiallyFilled,
        }
    }
}

/// One resolver's fill and its own HTLC/escrow pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRecord {
    pub resolver: String,
    pub resolver_address: String,
    pub range: ChunkRange,
    pub secret_index: u32,
    /// `sha256(secrets[secret_index])`, the pair's hashlock
    pub hashlock: Hash32,
    pub proof: Vec<Hash32>,
    pub bitcoin_amount: Sats,
    #[serde(with = "u128_string")]
    pub ethereum_amount: Wei,
    #[serde(flatten)]
    pub legs: LegPair,
}

impl FillRecord {
    pub fn is_filled(&self) -> bool {
        self.legs.phase == SwapPhase::BothClaimed
    }
}

/// Merkle-chunked order attached to a partial-mode swap record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialOrder {
    pub merkle_root: Hash32,
    /// All 101 secrets; persisted so claims can resume, never served
    pub secrets: Vec<Secret>,
    pub fills: Vec<FillRecord>,
}

impl PartialOrder {
    pub fn secret(&self, index: u32) -> SwapResult<&Secret> {
        self.secrets
            .get(index as usize)
            .ok_or(SwapError::Merkle { index })
    }

    /// Secret for `fill`, checked against the root before it is used
    pub fn verified_secret(&self, fill: &FillRecord) -> SwapResult<&Secret> {
        let secret = self.secret(fill.secret_index)?;
        if !merkle::verify_chunk(fill.secret_index, secret, &fill.proof, &self.merkle_root) {
            return Err(SwapError::Merkle {
                index: fill.secret_index,
            });
        }
        Ok(secret)
    }

    pub fn overall_filled(&self) -> u32 {
        self.fills
            .iter()
            .filter(|f| f.is_filled())
            .map(|f| f.range.percent())
            .sum()
    }

    pub fn fill_status(&self) -> FillStatus {
        FillStatus::from_percent(self.overall_filled())
    }

    /// Aggregate of per-fill statuses. Any completed fill completes the
    /// order once no fill is still live; a partial fill is a valid end.
    pub fn overall_status(&self) -> OverallStatus {
        aggregate_statuses(self.fills.iter().map(|f| f.legs.overall_status()))
    }

    /// Least advanced phase over fills still on the happy path
    pub fn aggregate_phase(&self) -> SwapPhase {
        let live = self
            .fills
            .iter()
            .filter(|f| !f.legs.phase.is_terminal())
            .filter_map(|f| f.legs.phase.step())
            .min();
        if let Some(step) = live {
            return SwapPhase::SEQUENCE[step];
        }
        if self.fills.iter().any(FillRecord::is_filled) {
            SwapPhase::BothClaimed
        } else if self
            .fills
            .iter()
            .any(|f| f.legs.phase == SwapPhase::TimeoutRefunded)
        {
            SwapPhase::TimeoutRefunded
        } else {
            SwapPhase::Error
        }
    }
}

/// Combine several pair statuses into one order status
pub fn aggregate_statuses<I>(statuses: I) -> OverallStatus
where
    I: IntoIterator<Item = OverallStatus>,
{
    let statuses: Vec<OverallStatus> = statuses.into_iter().collect();
    if statuses.is_empty() {
        return OverallStatus::Pending;
    }
    let any = |s: OverallStatus| statuses.contains(&s);
    let all_settled = statuses
        .iter()
        .all(|s| matches!(s, OverallStatus::Completed | OverallStatus::Refunded | OverallStatus::Error));

    if all_settled {
        if any(OverallStatus::Completed) {
            OverallStatus::Completed
        } else if any(OverallStatus::Refunded) {
            OverallStatus::Refunded
        } else {
            OverallStatus::Error
        }
    } else if any(OverallStatus::Active) {
        OverallStatus::Active
    } else {
        OverallStatus::Pending
    }
}

// =============================================================================
// Ledger
// =============================================================================

/// Validates resolver ranges before any chain work starts
#[derive(Debug, Default)]
pub struct FillLedger {
    ranges: Vec<ChunkRange>,
}

impl FillLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a range that is well formed and disjoint from every earlier one
    pub fn add(&mut self, range: ChunkRange) -> SwapResult<()> {
        let range = ChunkRange::new(range.lo, range.hi)?;
        if let Some(existing) = self.ranges.iter().find(|r| r.overlaps(&range)) {
            return Err(SwapError::RangeConflict {
                lo: range.lo,
                hi: range.hi,
                reason: format!("overlaps {}", existing),
            });
        }
        self.ranges.push(range);
        Ok(())
    }

    pub fn covered(&self) -> u32 {
        self.ranges.iter().map(ChunkRange::percent).sum()
    }

    pub fn ranges(&self) -> &[ChunkRange] {
        &self.ranges
    }
}

/// Split the order amounts over `ranges` by percentage in base units.
///
/// When the ranges cover the whole order the highest range takes the
/// rounding remainder so the parts sum exactly to the totals.
pub fn pro_rate(ranges: &[ChunkRange], bitcoin_total: Sats, ethereum_total: Wei) -> Vec<(Sats, Wei)> {
    let mut parts: Vec<(Sats, Wei)> = ranges
        .iter()
        .map(|r| {
            let pct = r.percent();
            (
                bitcoin_total * pct as u64 / CHUNK_COUNT as u64,
                ethereum_total / CHUNK_COUNT as u128 * pct as u128
                    + ethereum_total % CHUNK_COUNT as u128 * pct as u128 / CHUNK_COUNT as u128,
            )
        })
        .collect();

    let covered: u32 = ranges.iter().map(ChunkRange::percent).sum();
    let last = ranges
        .iter()
        .enumerate()
        .max_by_key(|(_, r)| r.lo)
        .map(|(i, _)| i);

    if let (true, Some(last)) = (covered == CHUNK_COUNT as u32, last) {
        let btc_others: Sats = parts.iter().enumerate().filter(|(i, _)| *i != last).map(|(_, p)| p.0).sum();
        let eth_others: Wei = parts.iter().enumerate().filter(|(i, _)| *i != last).map(|(_, p)| p.1).sum();
        parts[last] = (bitcoin_total - btc_others, ethereum_total - eth_others);
    }
    parts
}

/// Ethereum order hash for one resolver's escrow
pub fn fill_order_hash(order_id: &str, resolver: &str) -> Hash32 {
    Hash32::keccak256(format!("{}-{}", order_id, resolver).as_bytes())
}

/// Status pair shown for the whole order on the record's top-level legs
pub fn aggregate_leg_statuses(order: &PartialOrder) -> (ChainStatus, ChainStatus) {
    order.aggregate_phase().leg_statuses().unwrap_or_else(|| {
        let leg = match order.overall_status() {
            OverallStatus::Refunded => ChainStatus::Refunded,
            _ => ChainStatus::Error,
        };
        (leg, leg)
    })
}
