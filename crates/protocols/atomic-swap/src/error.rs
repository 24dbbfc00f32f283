//! Coordinator-level errors

use portal_core::{Chain, ChainError, InvalidSwapId, StoreError};
use thiserror::Error;

use crate::state::SwapPhase;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid swap request: {0}")]
    Validation(String),

    #[error("Illegal transition {from} -> {to}")]
    InvalidTransition { from: SwapPhase, to: SwapPhase },

    #[error("Swap {swap_id} is already {phase}")]
    Terminal { swap_id: String, phase: SwapPhase },

    #[error("Bitcoin timeout ({bitcoin_secs}s) must exceed Ethereum timeout ({ethereum_secs}s)")]
    TimelockOrdering { bitcoin_secs: u64, ethereum_secs: u64 },

    #[error("{chain} timelock still active until {until}")]
    TimelockActive { chain: Chain, until: u64 },

    #[error("Randomness source failed: {0}")]
    Entropy(String),

    #[error("Merkle proof rejected for chunk {index}")]
    Merkle { index: u32 },

    #[error("Swap not found: {0}")]
    NotFound(String),

    #[error("Chunk range [{lo}, {hi}] conflicts: {reason}")]
    RangeConflict { lo: u32, hi: u32, reason: String },

    #[error("Swap {0} was abandoned")]
    Abandoned(String),
}

impl SwapError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Chain(e) => e.error_code(),
            Self::Store(e) => e.error_code(),
            Self::Validation(_) => "validation_error",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Terminal { .. } => "swap_terminal",
            Self::TimelockOrdering { .. } => "timelock_ordering",
            Self::TimelockActive { .. } => "timelock_active",
            Self::Entropy(_) => "entropy_failure",
            Self::Merkle { .. } => "merkle_proof_invalid",
            Self::NotFound(_) => "not_found",
            Self::RangeConflict { .. } => "range_conflict",
            Self::Abandoned(_) => "swap_abandoned",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::Chain(e) => e.status_code(),
            Self::Store(e) => e.status_code(),
            Self::Validation(_) | Self::RangeConflict { .. } => 400,
            Self::NotFound(_) => 404,
            Self::InvalidTransition { .. }
            | Self::Terminal { .. }
            | Self::TimelockActive { .. }
            | Self::Abandoned(_) => 409,
            Self::Merkle { .. } => 422,
            Self::TimelockOrdering { .. } | Self::Entropy(_) => 500,
        }
    }
}

impl From<InvalidSwapId> for SwapError {
    fn from(e: InvalidSwapId) -> Self {
        Self::Validation(e.to_string())
    }
}

pub type SwapResult<T> = std::result::Result<T, SwapError>;
