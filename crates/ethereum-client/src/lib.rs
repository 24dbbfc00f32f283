//! ethereum-client: Ethereum escrow adapter
//!
//! Talks to a node over JSON-RPC and sends through the node-managed signer
//! (`eth_sendTransaction`). Every state-changing call is simulated with
//! `eth_call` first so contract reverts surface as typed errors before any
//! gas is spent, then sent under the signer's nonce slot and awaited until
//! mined.

pub mod abi;
pub mod nonce;
pub mod rpc;

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use portal_core::{
    Chain, ChainError, ChainResult, EscrowHandle, EscrowObservation, EscrowParams,
    EthereumConfig, EthereumEscrow, Hash32, OrderProtocol, Sats, Secret, TxId, UnixSecs, Wei,
};
use serde_json::json;
use tokio::sync::RwLock;
use tokio::time::{sleep, Instant};

use abi::Token;
use nonce::NonceTracker;
use rpc::{CallFailure, EthRpcClient, TransactionRequest};

pub use abi::{keccak256, order_hash};

/// Hashlocks of escrows this process created and that are still open,
/// keyed by lowercase address
#[derive(Debug, Default)]
struct HashlockCache {
    inner: RwLock<HashMap<String, Hash32>>,
}

impl HashlockCache {
    async fn remember(&self, escrow: &str, hashlock: Hash32) {
        self.inner.write().await.insert(escrow.to_lowercase(), hashlock);
    }

    async fn get(&self, escrow: &str) -> Option<Hash32> {
        self.inner.read().await.get(&escrow.to_lowercase()).copied()
    }

    /// The escrow was claimed or refunded
    async fn forget(&self, escrow: &str) {
        self.inner.write().await.remove(&escrow.to_lowercase());
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.inner.read().await.len()
    }
}

/// Ethereum escrow adapter over JSON-RPC
pub struct EthereumClient {
    rpc: EthRpcClient,
    signer: String,
    factory: String,
    limit_order_protocol: Option<String>,
    create_gas: u64,
    call_gas: u64,
    receipt_poll: Duration,
    receipt_timeout: Duration,
    nonces: NonceTracker,
    hashlocks: HashlockCache,
}

impl EthereumClient {
    /// Build the client, resolving the signer from `eth_accounts` when unset
    pub async fn connect(config: &EthereumConfig) -> ChainResult<Self> {
        let rpc = EthRpcClient::new(&config.rpc_url)?;

        let signer = if config.signer_address.is_empty() {
            rpc.accounts().await?.into_iter().next().ok_or_else(|| {
                ChainError::validation("node exposes no accounts and no signer_address is set")
            })?
        } else {
            config.signer_address.clone()
        };
        abi::parse_address(&signer)?;
        abi::parse_address(&config.factory_address)?;

        tracing::info!(signer = %signer, factory = %config.factory_address, "Ethereum client ready");

        Ok(Self {
            rpc,
            signer,
            factory: config.factory_address.clone(),
            limit_order_protocol: config.limit_order_protocol.clone(),
            create_gas: config.create_gas,
            call_gas: config.call_gas,
            receipt_poll: Duration::from_secs(config.receipt_poll_secs.max(1)),
            receipt_timeout: Duration::from_secs(config.receipt_timeout_secs),
            nonces: NonceTracker::new(),
            hashlocks: HashlockCache::default(),
        })
    }

    pub fn rpc(&self) -> &EthRpcClient {
        &self.rpc
    }

    /// Dry-run the call from the signer; a revert comes back as `CallFailure::Reverted`
    async fn simulate(&self, to: &str, data: &str, value: Wei) -> Result<(), CallFailure> {
        let call = json!({
            "from": self.signer,
            "to": to,
            "data": data,
            "value": abi::quantity(value),
        });
        self.rpc
            .call_checked::<String>("eth_call", json!([call, "latest"]))
            .await
            .map(|_| ())
    }

    /// Submit under the signer's nonce slot, then wait for the receipt
    /// outside the slot.
    async fn send(&self, to: &str, data: String, value: Wei, gas: u64) -> ChainResult<TxId> {
        let slot = self.nonces.acquire().await;
        let nonce = match slot.cached() {
            Some(n) => n,
            None => self.rpc.pending_nonce(&self.signer).await?,
        };

        let tx = TransactionRequest {
            from: self.signer.clone(),
            to: to.to_string(),
            data,
            value: abi::quantity(value),
            gas: abi::quantity(gas as u128),
            nonce: Some(abi::quantity(nonce as u128)),
        };

        let hash = match self
            .rpc
            .call_checked::<String>("eth_sendTransaction", json!([tx]))
            .await
        {
            Ok(hash) => {
                slot.commit(nonce);
                hash
            }
            Err(CallFailure::NonceTooLow(msg)) => {
                tracing::warn!(nonce, "Nonce too low, resetting from node");
                slot.invalidate();
                return Err(ChainError::rpc(Chain::Ethereum, msg));
            }
            Err(CallFailure::Reverted(reason)) => {
                slot.release();
                return Err(ChainError::InvalidState { reason });
            }
            Err(other) => {
                // Unknown whether the node took the nonce
                slot.invalidate();
                return Err(other.into_chain_error());
            }
        };

        tracing::debug!(tx = %hash, nonce, to = %to, "Transaction submitted");
        self.wait_receipt(&hash).await
    }

    async fn wait_receipt(&self, hash: &str) -> ChainResult<TxId> {
        let deadline = Instant::now() + self.receipt_timeout;
        loop {
            match self.rpc.receipt(hash).await {
                Ok(Some(receipt)) if receipt.succeeded() => return Ok(TxId::new(hash)),
                Ok(Some(_)) => {
                    return Err(ChainError::invalid_state(format!(
                        "transaction {} reverted",
                        hash
                    )))
                }
                Ok(None) => {}
                Err(e) if e.is_transient() => {
                    tracing::warn!(tx = %hash, error = %e, "Receipt poll failed, retrying");
                }
                Err(e) => return Err(e),
            }
            if Instant::now() + self.receipt_poll > deadline {
                return Err(ChainError::Timeout {
                    what: format!("receipt for {}", hash),
                    waited_secs: self.receipt_timeout.as_secs(),
                });
            }
            sleep(self.receipt_poll).await;
        }
    }

    async fn known_hashlock(&self, escrow: &str) -> Option<Hash32> {
        self.hashlocks.get(escrow).await
    }
}

/// Map a factory revert: anything mentioning an existing escrow is a duplicate
fn create_revert(reason: String, order_hash: &Hash32) -> ChainError {
    if reason.to_lowercase().contains("exist") {
        ChainError::DuplicateEscrow {
            order_hash: order_hash.to_hex(),
        }
    } else {
        ChainError::InvalidState { reason }
    }
}

/// Map a claim revert: hash complaints are preimage mismatches
fn claim_revert(reason: String, hashlock: Option<Hash32>) -> ChainError {
    let lower = reason.to_lowercase();
    if lower.contains("preimage") || lower.contains("hash") {
        ChainError::PreimageMismatch {
            hashlock: hashlock.map(|h| h.to_hex()).unwrap_or_default(),
        }
    } else {
        ChainError::InvalidState { reason }
    }
}

#[async_trait]
impl EthereumEscrow for EthereumClient {
    fn signer(&self) -> &str {
        &self.signer
    }

    async fn create_escrow(&self, params: &EscrowParams) -> ChainResult<EscrowHandle> {
        let maker = abi::parse_address(&params.maker)?;
        let receiver = abi::parse_address(&params.receiver)?;

        if self.escrow_address(&params.order_hash).await?.is_some() {
            return Err(ChainError::DuplicateEscrow {
                order_hash: params.order_hash.to_hex(),
            });
        }

        let data = abi::encode_call(
            abi::CREATE_ESCROW,
            &[
                Token::Bytes32(params.order_hash),
                Token::Address(maker),
                Token::Address(receiver),
                Token::Bytes32(params.hashlock),
                Token::Uint(params.timeout as u128),
            ],
        );

        match self.simulate(&self.factory, &data, 0).await {
            Ok(()) => {}
            Err(CallFailure::Reverted(reason)) => {
                return Err(create_revert(reason, &params.order_hash))
            }
            Err(other) => return Err(other.into_chain_error()),
        }

        let tx = match self.send(&self.factory, data, 0, self.create_gas).await {
            Err(ChainError::InvalidState { reason }) => {
                return Err(create_revert(reason, &params.order_hash))
            }
            other => other?,
        };

        let address = self
            .escrow_address(&params.order_hash)
            .await?
            .ok_or_else(|| ChainError::invalid_state("factory did not register the escrow"))?;

        self.hashlocks.remember(&address, params.hashlock).await;

        tracing::info!(
            escrow = %address,
            order_hash = %params.order_hash,
            hashlock = %params.hashlock,
            tx = %tx,
            "Created Ethereum escrow"
        );
        Ok(EscrowHandle { address, tx })
    }

    async fn escrow_address(&self, order_hash: &Hash32) -> ChainResult<Option<String>> {
        let data = abi::encode_call(abi::ESCROWS, &[Token::Bytes32(*order_hash)]);
        let result = self.rpc.eth_call(&self.factory, &data).await?;
        let words = abi::decode_words(&result)?;
        let word = words
            .first()
            .ok_or_else(|| ChainError::rpc(Chain::Ethereum, "escrows() returned no data"))?;
        let address = abi::word_to_address(word);
        if address == [0u8; 20] {
            Ok(None)
        } else {
            Ok(Some(abi::format_address(&address)))
        }
    }

    async fn fund_escrow(&self, escrow: &str, amount: Wei) -> ChainResult<TxId> {
        abi::parse_address(escrow)?;
        let data = abi::encode_call(abi::CREATE_HTLC, &[]);
        self.simulate(escrow, &data, amount)
            .await
            .map_err(CallFailure::into_chain_error)?;
        let tx = self.send(escrow, data, amount, self.call_gas).await?;
        tracing::info!(escrow = %escrow, amount_wei = %amount, tx = %tx, "Funded Ethereum escrow");
        Ok(tx)
    }

    async fn claim_escrow(&self, escrow: &str, preimage: &Secret) -> ChainResult<TxId> {
        abi::parse_address(escrow)?;
        let hashlock = self.known_hashlock(escrow).await;
        if let Some(expected) = hashlock {
            if preimage.hashlock() != expected {
                return Err(ChainError::PreimageMismatch {
                    hashlock: expected.to_hex(),
                });
            }
        }

        let status = self.escrow_status(escrow).await?;
        if status.claimed || status.refunded {
            self.hashlocks.forget(escrow).await;
        }
        if status.claimed {
            return Err(ChainError::invalid_state("escrow already claimed"));
        }
        if status.refunded || !status.active {
            return Err(ChainError::invalid_state("escrow is not active"));
        }

        let data = abi::encode_call(
            abi::CLAIM_HTLC,
            &[Token::Bytes32(Hash32(*preimage.as_bytes()))],
        );
        match self.simulate(escrow, &data, 0).await {
            Ok(()) => {}
            Err(CallFailure::Reverted(reason)) => return Err(claim_revert(reason, hashlock)),
            Err(other) => return Err(other.into_chain_error()),
        }

        let tx = self.send(escrow, data, 0, self.call_gas).await?;
        self.hashlocks.forget(escrow).await;
        tracing::info!(escrow = %escrow, tx = %tx, "Claimed Ethereum escrow");
        Ok(tx)
    }

    async fn refund_escrow(&self, escrow: &str) -> ChainResult<TxId> {
        abi::parse_address(escrow)?;
        let data = abi::encode_call(abi::REFUND_HTLC, &[]);
        self.simulate(escrow, &data, 0)
            .await
            .map_err(CallFailure::into_chain_error)?;
        let tx = self.send(escrow, data, 0, self.call_gas).await?;
        self.hashlocks.forget(escrow).await;
        tracing::info!(escrow = %escrow, tx = %tx, "Refunded Ethereum escrow");
        Ok(tx)
    }

    async fn escrow_status(&self, escrow: &str) -> ChainResult<EscrowObservation> {
        abi::parse_address(escrow)?;
        let data = abi::encode_call(abi::GET_STATUS, &[]);
        let result = self.rpc.eth_call(escrow, &data).await?;
        let words = abi::decode_words(&result)?;
        if words.len() < 4 {
            return Err(ChainError::rpc(
                Chain::Ethereum,
                format!("getStatus() returned {} words", words.len()),
            ));
        }

        let active = abi::word_to_bool(&words[0]);
        let amount = abi::word_to_u128(&words[1])?;
        let timeout = abi::word_to_u128(&words[2])? as UnixSecs;
        let claimed = abi::word_to_bool(&words[3]);

        // getStatus() cannot tell "never funded" from "refunded"; a refunded
        // escrow has emitted both a funding and a refund event.
        let refunded = if !active && !claimed && amount == 0 {
            self.rpc.logs(escrow).await?.len() >= 2
        } else {
            false
        };

        Ok(EscrowObservation {
            address: escrow.to_string(),
            active,
            amount,
            timeout,
            claimed,
            refunded,
        })
    }

    async fn timestamp(&self) -> ChainResult<UnixSecs> {
        self.rpc.latest_timestamp().await
    }
}

#[async_trait]
impl OrderProtocol for EthereumClient {
    async fn initiate_cross_chain_swap(
        &self,
        order_hash: &Hash32,
        bitcoin_amount: Sats,
        ethereum_amount: Wei,
    ) -> ChainResult<TxId> {
        let lop = self.limit_order_protocol.as_deref().ok_or_else(|| {
            ChainError::validation("limit_order_protocol address is not configured")
        })?;
        let data = abi::encode_call(
            abi::INITIATE_CROSS_CHAIN_SWAP,
            &[
                Token::Bytes32(*order_hash),
                Token::Uint(bitcoin_amount as u128),
                Token::Uint(ethereum_amount),
            ],
        );
        self.simulate(lop, &data, 0)
            .await
            .map_err(CallFailure::into_chain_error)?;
        let tx = self.send(lop, data, 0, self.call_gas).await?;
        tracing::info!(order_hash = %order_hash, tx = %tx, "Registered order with limit order protocol");
        Ok(tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_revert_mapping() {
        let hash = Hash32([9u8; 32]);
        let err = create_revert("Escrow already exists".into(), &hash);
        assert_eq!(
            err,
            ChainError::DuplicateEscrow {
                order_hash: hash.to_hex()
            }
        );
        let err = create_revert("Invalid timeout".into(), &hash);
        assert!(matches!(err, ChainError::InvalidState { .. }));
    }

    #[test]
    fn test_claim_revert_mapping() {
        let err = claim_revert("Invalid preimage".into(), Some(Hash32([1u8; 32])));
        assert!(matches!(err, ChainError::PreimageMismatch { .. }));
        let err = claim_revert("Already claimed".into(), None);
        assert!(matches!(err, ChainError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn test_hashlock_cache_forgets_closed_escrows() {
        let cache = HashlockCache::default();
        let lock = Hash32([4u8; 32]);
        cache.remember("0xAbC0000000000000000000000000000000000001", lock).await;
        cache.remember("0xabc0000000000000000000000000000000000002", lock).await;
        assert_eq!(
            cache.get("0xabc0000000000000000000000000000000000001").await,
            Some(lock)
        );

        cache.forget("0xABC0000000000000000000000000000000000001").await;
        assert_eq!(cache.get("0xabc0000000000000000000000000000000000001").await, None);
        assert_eq!(cache.len().await, 1);
    }

    #[test]
    fn test_order_hash_is_keccak_of_label() {
        assert_eq!(order_hash("order-1"), keccak256(b"order-1"));
        assert_ne!(order_hash("order-1"), Hash32::sha256(b"order-1"));
    }
}
