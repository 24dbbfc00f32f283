//! Error types for Thunder Portal

use thiserror::Error;

use crate::{AmountError, Chain, HexError};

/// Top-level errors for workspace plumbing (config, persistence, encoding)
#[derive(Debug, Error)]
pub enum Error {
    #[error("Chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Errors raised by a chain adapter (Bitcoin HTLC or Ethereum escrow)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    #[error("{chain} RPC error: {message}")]
    Rpc { chain: Chain, message: String },

    #[error("Insufficient funds: need {required}, have {available}")]
    InsufficientFunds { required: u128, available: u128 },

    #[error("Escrow already exists for order hash {order_hash}")]
    DuplicateEscrow { order_hash: String },

    #[error("Preimage does not match hashlock {hashlock}")]
    PreimageMismatch { hashlock: String },

    #[error("Invalid contract state: {reason}")]
    InvalidState { reason: String },

    #[error("Timed out waiting for {what} after {waited_secs}s")]
    Timeout { what: String, waited_secs: u64 },

    #[error("Script error: {message}")]
    Script { message: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Operation cancelled")]
    Cancelled,
}

impl ChainError {
    pub fn rpc(chain: Chain, message: impl Into<String>) -> Self {
        Self::Rpc {
            chain,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn invalid_state(reason: impl Into<String>) -> Self {
        Self::InvalidState {
            reason: reason.into(),
        }
    }

    /// Only connection-level RPC failures are worth a retry. Everything else
    /// is either a protocol violation or bad input and must fail immediately.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Rpc { .. })
    }

    /// Get an HTTP-friendly error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Rpc { .. } => "rpc_error",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::DuplicateEscrow { .. } => "duplicate_escrow",
            Self::PreimageMismatch { .. } => "preimage_mismatch",
            Self::InvalidState { .. } => "invalid_state",
            Self::Timeout { .. } => "timeout",
            Self::Script { .. } => "script_error",
            Self::Validation { .. } => "validation_error",
            Self::NotFound { .. } => "not_found",
            Self::Cancelled => "cancelled",
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Script { .. } | Self::Validation { .. } => 400,
            Self::NotFound { .. } => 404,
            Self::DuplicateEscrow { .. } | Self::InvalidState { .. } => 409,
            Self::InsufficientFunds { .. } | Self::PreimageMismatch { .. } => 422,
            Self::Cancelled => 499,
            Self::Rpc { .. } => 502,
            Self::Timeout { .. } => 504,
        }
    }
}

impl From<AmountError> for ChainError {
    fn from(e: AmountError) -> Self {
        Self::validation(e.to_string())
    }
}

impl From<HexError> for ChainError {
    fn from(e: HexError) -> Self {
        Self::validation(e.to_string())
    }
}

/// Swap-record persistence errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {message}")]
    Io { path: String, message: String },

    #[error("Corrupt record {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Record not found: {key}")]
    NotFound { key: String },

    #[error("Invalid record key: {key}")]
    InvalidKey { key: String },
}

impl StoreError {
    pub fn io(path: impl Into<String>, err: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            message: err.to_string(),
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Io { .. } => "store_io",
            Self::Corrupt { .. } => "store_corrupt",
            Self::NotFound { .. } => "not_found",
            Self::InvalidKey { .. } => "validation_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::InvalidKey { .. } => 400,
            Self::Io { .. } | Self::Corrupt { .. } => 500,
        }
    }
}

/// Result type alias for Thunder Portal plumbing
pub type Result<T> = std::result::Result<T, Error>;
