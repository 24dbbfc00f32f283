//! Core type definitions for Thunder Portal

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use thiserror::Error;

/// Error parsing a fixed-size hex value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HexError {
    #[error("Invalid hex: {0}")]
    Invalid(String),

    #[error("Expected 32 bytes, got {0}")]
    Length(usize),
}

fn decode_32(s: &str) -> Result<[u8; 32], HexError> {
    let trimmed = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(trimmed).map_err(|e| HexError::Invalid(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(HexError::Length(bytes.len()));
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// 32-byte digest: hashlocks, Merkle nodes, order hashes
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub const ZERO: Hash32 = Hash32([0u8; 32]);

    /// SHA-256 of `data`
    pub fn sha256(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    /// Keccak-256 of `data` (Ethereum order hashes and ABI selectors)
    pub fn keccak256(data: &[u8]) -> Self {
        Self(Keccak256::digest(data).into())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex, no `0x` prefix
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// `0x`-prefixed hex, the form Ethereum tooling expects for bytes32
    pub fn to_prefixed_hex(&self) -> String {
        format!("0x{}", self.to_hex())
    }

    /// Parse 32 bytes of hex, with or without a `0x` prefix
    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        decode_32(s).map(Self)
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

impl Serialize for Hash32 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash32 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash32::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// 32-byte secret (HTLC preimage or chunk secret).
///
/// `Debug` never prints the bytes. Serialization does, since records must
/// survive a restart; API layers decide when a secret may leave the process.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, HexError> {
        decode_32(s).map(Self)
    }

    /// The hashlock committing to this secret: SHA-256(secret)
    pub fn hashlock(&self) -> Hash32 {
        Hash32::sha256(&self.0)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(<redacted>)")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Secret::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Longest order id accepted
pub const MAX_ORDER_ID_LEN: usize = 64;

/// 1-64 characters from `[A-Za-z0-9._-]`
pub fn is_valid_order_id(order_id: &str) -> bool {
    !order_id.is_empty()
        && order_id.len() <= MAX_ORDER_ID_LEN
        && order_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid swap id '{0}': expected swap_<millis>_<orderId>")]
pub struct InvalidSwapId(pub String);

/// Swap ID assigned by the coordinator (`swap_<millis>_<orderId>`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwapId(pub String);

impl SwapId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build the storage key for a swap created at `millis`
    pub fn generate(millis: i64, order_id: &str) -> Self {
        Self(format!("swap_{}_{}", millis, order_id))
    }

    /// Parse an id received from outside, rejecting anything that is not
    /// `swap_<digits>_<orderId>`
    pub fn parse(id: &str) -> Result<Self, InvalidSwapId> {
        let id = Self::new(id);
        if id.is_well_formed() {
            Ok(id)
        } else {
            Err(InvalidSwapId(id.0))
        }
    }

    pub fn is_well_formed(&self) -> bool {
        self.0
            .strip_prefix("swap_")
            .and_then(|rest| rest.split_once('_'))
            .is_some_and(|(millis, order_id)| {
                !millis.is_empty()
                    && millis.bytes().all(|b| b.is_ascii_digit())
                    && is_valid_order_id(order_id)
            })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for SwapId {
    type Err = InvalidSwapId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SwapId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transaction ID on either chain (hex-encoded)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TxId(pub String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which ledger an observation or error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Bitcoin,
    Ethereum,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bitcoin => "bitcoin",
            Self::Ethereum => "ethereum",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bitcoin network the HTLC micro-API and node run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    #[default]
    Regtest,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Testnet => "testnet",
            Self::Regtest => "regtest",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status of one leg as observed on its own chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChainStatus {
    #[default]
    Pending,
    Created,
    Funded,
    Claimed,
    Refunded,
    Error,
}

impl ChainStatus {
    pub const ALL: [ChainStatus; 6] = [
        ChainStatus::Pending,
        ChainStatus::Created,
        ChainStatus::Funded,
        ChainStatus::Claimed,
        ChainStatus::Refunded,
        ChainStatus::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Created => "CREATED",
            Self::Funded => "FUNDED",
            Self::Claimed => "CLAIMED",
            Self::Refunded => "REFUNDED",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Swap status derived from both legs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverallStatus {
    Pending,
    Active,
    Completed,
    Refunded,
    Error,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Active => "ACTIVE",
            Self::Completed => "COMPLETED",
            Self::Refunded => "REFUNDED",
            Self::Error => "ERROR",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded)
    }
}

/// Overall status from the two independently observed legs.
///
/// Total over every pair of leg statuses; the first matching rule wins.
pub fn determine_overall_status(bitcoin: ChainStatus, ethereum: ChainStatus) -> OverallStatus {
    use ChainStatus::*;
    match (bitcoin, ethereum) {
        (Claimed, Claimed) => OverallStatus::Completed,
        (Refunded, _) | (_, Refunded) => OverallStatus::Refunded,
        (Error, _) | (_, Error) => OverallStatus::Error,
        (Funded, Funded) => OverallStatus::Active,
        _ => OverallStatus::Pending,
    }
}

impl fmt::Display for OverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution strategy for a swap request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapMode {
    /// One preimage, one HTLC/escrow pair
    #[default]
    Simple,
    /// Simple swap registered with the Limit Order Protocol first
    LimitOrder,
    /// Merkle-chunked order filled by competing resolvers
    Partial,
}

impl SwapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::LimitOrder => "limit_order",
            Self::Partial => "partial",
        }
    }
}

impl fmt::Display for SwapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Block height
pub type BlockHeight = u64;

/// Unix timestamp in seconds
pub type UnixSecs = u64;
