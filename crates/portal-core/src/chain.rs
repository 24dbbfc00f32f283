//! Chain adapter interfaces
//!
//! The coordinator drives both ledgers through these traits. RPC-backed
//! implementations live in `bitcoin-client` and `ethereum-client`; the
//! in-memory simulations live in `atomic-swap::sim`.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Instant};

use crate::units::u128_string;
use crate::{BlockHeight, ChainError, ChainStatus, Hash32, Sats, Secret, TxId, UnixSecs, Wei};

/// Result type for chain adapter operations
pub type ChainResult<T> = std::result::Result<T, ChainError>;

// ─── Bitcoin ────────────────────────────────────────────────────────────────

/// A created (not necessarily funded) Bitcoin HTLC
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtlcHandle {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script_hash: Option<String>,
    /// First block height at which the refund path is spendable
    pub timeout_height: BlockHeight,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utxo {
    pub txid: TxId,
    pub vout: u32,
    pub amount: Sats,
    pub confirmations: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingInfo {
    pub funded: bool,
    pub amount: Sats,
    pub utxos: Vec<Utxo>,
}

/// Live view of an HTLC address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HtlcObservation {
    pub address: String,
    pub balance: Sats,
    pub status: ChainStatus,
    pub tx_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_tx: Option<TxId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refund_tx: Option<TxId>,
    pub current_height: BlockHeight,
}

/// Anything that can report confirmations for a transaction id
#[async_trait]
pub trait ConfirmationSource: Send + Sync {
    /// Confirmations of `txid`; `NotFound` when the node has never seen it
    async fn confirmations(&self, txid: &TxId) -> ChainResult<u32>;
}

/// Bitcoin-side HTLC operations
#[async_trait]
pub trait BitcoinHtlc: ConfirmationSource {
    async fn create_htlc(
        &self,
        hashlock: &Hash32,
        claimer_pubkey: &str,
        timeout_blocks: u64,
    ) -> ChainResult<HtlcHandle>;

    /// Select UTXOs, pay `amount` to `address`, return the funding txid
    async fn fund_htlc(&self, address: &str, amount: Sats) -> ChainResult<TxId>;

    async fn check_funding(&self, address: &str) -> ChainResult<FundingInfo>;

    async fn claim_htlc(
        &self,
        order_id: &str,
        address: &str,
        preimage: &Secret,
    ) -> ChainResult<TxId>;

    /// Refund path; fails with `InvalidState` before the timeout height
    async fn refund_htlc(&self, order_id: &str, address: &str) -> ChainResult<TxId>;

    async fn block_height(&self) -> ChainResult<BlockHeight>;

    async fn htlc_status(&self, address: &str) -> ChainResult<HtlcObservation>;
}

// ─── Ethereum ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowParams {
    pub order_hash: Hash32,
    pub maker: String,
    pub receiver: String,
    pub hashlock: Hash32,
    /// Unix seconds after which the maker may refund
    pub timeout: UnixSecs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowHandle {
    pub address: String,
    pub tx: TxId,
}

/// Escrow `getStatus()` plus the refund flag the contract does not expose directly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowObservation {
    pub address: String,
    pub active: bool,
    #[serde(with = "u128_string")]
    pub amount: Wei,
    pub timeout: UnixSecs,
    pub claimed: bool,
    #[serde(default)]
    pub refunded: bool,
}

impl EscrowObservation {
    pub fn status(&self) -> ChainStatus {
        if self.claimed {
            ChainStatus::Claimed
        } else if self.refunded {
            ChainStatus::Refunded
        } else if self.active && self.amount > 0 {
            ChainStatus::Funded
        } else {
            ChainStatus::Created
        }
    }
}

/// Ethereum-side escrow operations. Returned txids are already mined.
#[async_trait]
pub trait EthereumEscrow: Send + Sync {
    /// Account the adapter sends from
    fn signer(&self) -> &str;

    /// Factory call; a second call for the same order hash is `DuplicateEscrow`
    async fn create_escrow(&self, params: &EscrowParams) -> ChainResult<EscrowHandle>;

    /// Factory `escrows(orderHash)` lookup
    async fn escrow_address(&self, order_hash: &Hash32) -> ChainResult<Option<String>>;

    async fn fund_escrow(&self, escrow: &str, amount: Wei) -> ChainResult<TxId>;

    async fn claim_escrow(&self, escrow: &str, preimage: &Secret) -> ChainResult<TxId>;

    async fn refund_escrow(&self, escrow: &str) -> ChainResult<TxId>;

    async fn escrow_status(&self, escrow: &str) -> ChainResult<EscrowObservation>;

    /// Latest block timestamp
    async fn timestamp(&self) -> ChainResult<UnixSecs>;
}

/// Limit Order Protocol registration
#[async_trait]
pub trait OrderProtocol: Send + Sync {
    async fn initiate_cross_chain_swap(
        &self,
        order_hash: &Hash32,
        bitcoin_amount: Sats,
        ethereum_amount: Wei,
    ) -> ChainResult<TxId>;
}

// ─── Waiting ────────────────────────────────────────────────────────────────

/// Poll `source` until `txid` has `required` confirmations.
///
/// Unknown transactions and transient RPC failures keep the poll going.
/// Returns `Timeout` once `timeout` elapses and `Cancelled` when `cancel`
/// flips to `true` or its sender is dropped. Holds no locks while sleeping.
pub async fn wait_for_confirmations<C>(
    source: &C,
    txid: &TxId,
    required: u32,
    timeout: Duration,
    poll: Duration,
    cancel: &mut watch::Receiver<bool>,
) -> ChainResult<u32>
where
    C: ConfirmationSource + ?Sized,
{
    let deadline = Instant::now() + timeout;

    loop {
        if *cancel.borrow() {
            return Err(ChainError::Cancelled);
        }

        match source.confirmations(txid).await {
            Ok(confs) if confs >= required => {
                tracing::debug!(txid = %txid, confs, "Transaction confirmed");
                return Ok(confs);
            }
            Ok(confs) => {
                tracing::trace!(txid = %txid, confs, required, "Waiting for confirmations");
            }
            Err(ChainError::NotFound { .. }) => {
                tracing::trace!(txid = %txid, "Transaction not yet visible");
            }
            Err(e) if e.is_transient() => {
                tracing::warn!(txid = %txid, error = %e, "Confirmation poll failed, retrying");
            }
            Err(e) => return Err(e),
        }

        tokio::select! {
            _ = sleep_until(deadline) => {
                return Err(ChainError::Timeout {
                    what: format!("{} confirmations of {}", required, txid),
                    waited_secs: timeout.as_secs(),
                });
            }
            _ = sleep(poll) => {}
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return Err(ChainError::Cancelled);
                }
            }
        }
    }
}
