//! bitcoin-client: Bitcoin node RPC and HTLC micro-API wrapper
//!
//! `BitcoinClient` implements `portal_core::BitcoinHtlc` on top of a Bitcoin
//! Core node (wallet signing, UTXO selection, confirmation queries) and the
//! HTLC micro-API (script construction, claim and refund spends).

pub mod htlc_api;
pub mod rpc;
pub mod utxo;

use async_trait::async_trait;
use portal_core::{
    BitcoinConfig, BitcoinHtlc, BlockHeight, ChainError, ChainResult, ChainStatus,
    ConfirmationSource, FundingInfo, Hash32, HtlcHandle, HtlcObservation, Sats, Secret, TxId,
};
use serde_json::Value;

pub use htlc_api::HtlcApiClient;
pub use rpc::BitcoinRpcClient;
pub use utxo::{select_utxos, SelectedInputs};

/// Change below this is left to the miner instead of creating a dust output
const DUST_LIMIT_SATS: Sats = 546;

/// A claim scriptSig carries the preimage on top of signature, pubkey and
/// redeem script, which pushes it past this many hex characters.
const CLAIM_SCRIPT_SIG_MIN_HEX: usize = 200;

/// Bitcoin HTLC adapter
#[derive(Clone)]
pub struct BitcoinClient {
    rpc: BitcoinRpcClient,
    api: HtlcApiClient,
    fee_sats: Sats,
}

impl BitcoinClient {
    pub fn new(config: &BitcoinConfig) -> ChainResult<Self> {
        Ok(Self {
            rpc: BitcoinRpcClient::new(config)?,
            api: HtlcApiClient::new(&config.htlc_api_url, &config.htlc_api_key)?,
            fee_sats: config.fee_sats,
        })
    }

    /// Underlying node client (for regtest helpers such as block generation)
    pub fn rpc(&self) -> &BitcoinRpcClient {
        &self.rpc
    }

    /// Check the node answers and the wallet is loaded
    pub async fn is_online(&self) -> bool {
        self.rpc.get_block_count().await.is_ok()
    }

    async fn address_history(&self, address: &str) -> ChainResult<Vec<Value>> {
        let entries = self.rpc.list_transactions(address, 100).await?;
        Ok(entries
            .into_iter()
            .filter(|tx| tx.get("address").and_then(|a| a.as_str()) == Some(address))
            .collect())
    }

    async fn classify_spend(&self, txid: &str) -> ChainResult<ChainStatus> {
        let tx = self.rpc.get_raw_transaction(txid).await?;
        let input = tx
            .get("vin")
            .and_then(|v| v.get(0))
            .ok_or_else(|| ChainError::rpc(portal_core::Chain::Bitcoin, "spend has no inputs"))?;
        Ok(spend_kind(input))
    }
}

/// Claim or refund, judged from the first input of the spending transaction.
fn spend_kind(input: &Value) -> ChainStatus {
    let witness_has_preimage = input
        .get("txinwitness")
        .and_then(|w| w.as_array())
        .map(|items| items.iter().any(|i| i.as_str().map(str::len) == Some(64)))
        .unwrap_or(false);
    if witness_has_preimage {
        return ChainStatus::Claimed;
    }

    let script_sig_len = input
        .get("scriptSig")
        .and_then(|s| s.get("hex"))
        .and_then(|h| h.as_str())
        .map(str::len)
        .unwrap_or(0);
    if script_sig_len > CLAIM_SCRIPT_SIG_MIN_HEX {
        ChainStatus::Claimed
    } else {
        ChainStatus::Refunded
    }
}

#[async_trait]
impl ConfirmationSource for BitcoinClient {
    async fn confirmations(&self, txid: &TxId) -> ChainResult<u32> {
        let tx = self.rpc.get_raw_transaction(txid.as_str()).await?;
        Ok(tx
            .get("confirmations")
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as u32)
    }
}

#[async_trait]
impl BitcoinHtlc for BitcoinClient {
    async fn create_htlc(
        &self,
        hashlock: &Hash32,
        claimer_pubkey: &str,
        timeout_blocks: u64,
    ) -> ChainResult<HtlcHandle> {
        let height = self.rpc.get_block_count().await?;
        let created = self.api.create(hashlock, claimer_pubkey, timeout_blocks).await?;

        // Watch-only import lets listunspent/listtransactions see the address
        if let Err(e) = self.rpc.import_address(&created.htlc_address, &created.htlc_address).await {
            tracing::warn!(address = %created.htlc_address, error = %e, "importaddress failed");
        }

        tracing::info!(
            address = %created.htlc_address,
            hashlock = %hashlock,
            timeout_blocks,
            "Created Bitcoin HTLC"
        );

        Ok(HtlcHandle {
            address: created.htlc_address,
            script_hash: created.script_hash,
            timeout_height: height + timeout_blocks,
        })
    }

    async fn fund_htlc(&self, address: &str, amount: Sats) -> ChainResult<TxId> {
        let utxos: Vec<_> = self
            .rpc
            .list_unspent(1, None)
            .await?
            .iter()
            .map(|u| u.to_utxo())
            .collect();

        let selected = select_utxos(&utxos, amount, self.fee_sats)?;

        let mut outputs = vec![(address.to_string(), amount)];
        if selected.change >= DUST_LIMIT_SATS {
            let change_address = self.rpc.get_new_address().await?;
            outputs.push((change_address, selected.change));
        }

        let unsigned = self
            .rpc
            .create_raw_transaction(&selected.inputs, &outputs)
            .await?;
        let signed = self.rpc.sign_raw_transaction_with_wallet(&unsigned).await?;
        if !signed.complete {
            return Err(ChainError::Script {
                message: "wallet could not fully sign funding transaction".to_string(),
            });
        }
        let txid = self.rpc.send_raw_transaction(&signed.hex).await?;

        tracing::info!(
            address = %address,
            amount_sats = amount,
            inputs = selected.inputs.len(),
            txid = %txid,
            "Funded Bitcoin HTLC"
        );
        Ok(txid)
    }

    async fn check_funding(&self, address: &str) -> ChainResult<FundingInfo> {
        let addresses = [address.to_string()];
        let utxos: Vec<_> = self
            .rpc
            .list_unspent(0, Some(&addresses))
            .await?
            .iter()
            .map(|u| u.to_utxo())
            .collect();
        let amount: Sats = utxos.iter().map(|u| u.amount).sum();
        Ok(FundingInfo {
            funded: amount > 0,
            amount,
            utxos,
        })
    }

    async fn claim_htlc(&self, order_id: &str, address: &str, preimage: &Secret) -> ChainResult<TxId> {
        let txid = self.api.claim(order_id, address, preimage).await?;
        tracing::info!(order_id, address = %address, txid = %txid, "Claimed Bitcoin HTLC");
        Ok(txid)
    }

    async fn refund_htlc(&self, order_id: &str, address: &str) -> ChainResult<TxId> {
        let txid = self.api.refund(order_id, address).await?;
        tracing::info!(order_id, address = %address, txid = %txid, "Refunded Bitcoin HTLC");
        Ok(txid)
    }

    async fn block_height(&self) -> ChainResult<BlockHeight> {
        self.rpc.get_block_count().await
    }

    async fn htlc_status(&self, address: &str) -> ChainResult<HtlcObservation> {
        let funding = self.check_funding(address).await?;
        let history = self.address_history(address).await?;
        let current_height = self.rpc.get_block_count().await?;

        let mut txids: Vec<&str> = history
            .iter()
            .filter_map(|tx| tx.get("txid").and_then(|t| t.as_str()))
            .collect();
        txids.sort_unstable();
        txids.dedup();

        let mut observation = HtlcObservation {
            address: address.to_string(),
            balance: funding.amount,
            status: if txids.is_empty() {
                ChainStatus::Created
            } else {
                ChainStatus::Funded
            },
            tx_count: txids.len(),
            claim_tx: None,
            refund_tx: None,
            current_height,
        };

        if funding.amount == 0 && txids.len() > 1 {
            let spend = history.iter().find(|tx| {
                tx.get("category").and_then(|c| c.as_str()) == Some("send")
            });
            if let Some(txid) = spend.and_then(|tx| tx.get("txid")).and_then(|t| t.as_str()) {
                match self.classify_spend(txid).await? {
                    ChainStatus::Claimed => {
                        observation.status = ChainStatus::Claimed;
                        observation.claim_tx = Some(TxId::new(txid));
                    }
                    _ => {
                        observation.status = ChainStatus::Refunded;
                        observation.refund_tx = Some(TxId::new(txid));
                    }
                }
            }
        }

        Ok(observation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_spend_kind_from_script_sig() {
        let claim = json!({ "scriptSig": { "hex": "a".repeat(300) } });
        let refund = json!({ "scriptSig": { "hex": "a".repeat(180) } });
        assert_eq!(spend_kind(&claim), ChainStatus::Claimed);
        assert_eq!(spend_kind(&refund), ChainStatus::Refunded);
    }

    #[test]
    fn test_spend_kind_from_witness() {
        let claim = json!({
            "scriptSig": { "hex": "" },
            "txinwitness": ["30".repeat(71), "ab".repeat(32), "01", "63".repeat(50)]
        });
        let refund = json!({
            "scriptSig": { "hex": "" },
            "txinwitness": ["30".repeat(71), "", "63".repeat(50)]
        });
        assert_eq!(spend_kind(&claim), ChainStatus::Claimed);
        assert_eq!(spend_kind(&refund), ChainStatus::Refunded);
    }

    #[test]
    fn test_client_builds_from_default_config() {
        assert!(BitcoinClient::new(&BitcoinConfig::default()).is_ok());
    }
}
