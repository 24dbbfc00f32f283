//! In-memory chains for tests and `backend = "simulated"` demos
//!
//! Both simulations enforce the contract rules the coordinator relies on:
//! SHA-256 hashlocks, refund only after the timelock, one escrow per order
//! hash. Time moves only when the caller mines blocks or advances the clock.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use portal_core::{
    BitcoinHtlc, BlockHeight, Chain, ChainError, ChainResult, ChainStatus, ConfirmationSource,
    EscrowHandle, EscrowObservation, EscrowParams, EthereumEscrow, FundingInfo, Hash32,
    HtlcHandle, HtlcObservation, OrderProtocol, Sats, Secret, TxId, UnixSecs, Utxo, Wei,
};
use tokio::sync::Mutex;

/// Regtest-like starting height
const GENESIS_HEIGHT: BlockHeight = 101;

/// Hardhat account #0, the default node-managed signer
pub const SIM_SIGNER: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";

fn fake_txid(chain: &str, counter: u64) -> TxId {
    TxId::new(Hash32::sha256(format!("{}-tx-{}", chain, counter).as_bytes()).to_hex())
}

fn is_eth_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .map(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

// =============================================================================
// Bitcoin
// =============================================================================

#[derive(Debug, Clone)]
struct SimHtlc {
    hashlock: Hash32,
    timeout_height: BlockHeight,
    balance: Sats,
    funding: Vec<TxId>,
    claim_tx: Option<TxId>,
    refund_tx: Option<TxId>,
}

#[derive(Debug)]
struct BitcoinState {
    height: BlockHeight,
    wallet: Sats,
    fee: Sats,
    auto_mine: bool,
    counter: u64,
    /// txid -> height it was mined at (None while in the mempool)
    txs: HashMap<TxId, Option<BlockHeight>>,
    htlcs: HashMap<String, SimHtlc>,
    fail_next: bool,
}

impl BitcoinState {
    fn next_tx(&mut self) -> TxId {
        self.counter += 1;
        let txid = fake_txid("btc", self.counter);
        let mined = if self.auto_mine {
            self.height += 1;
            Some(self.height)
        } else {
            None
        };
        self.txs.insert(txid.clone(), mined);
        txid
    }

    fn take_failure(&mut self) -> ChainResult<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(ChainError::rpc(Chain::Bitcoin, "simulated connection reset"));
        }
        Ok(())
    }

    fn htlc(&mut self, address: &str) -> ChainResult<&mut SimHtlc> {
        self.htlcs.get_mut(address).ok_or_else(|| ChainError::NotFound {
            what: format!("HTLC {}", address),
        })
    }
}

#[derive(Debug)]
pub struct SimulatedBitcoin {
    state: Mutex<BitcoinState>,
}

impl SimulatedBitcoin {
    /// A wallet holding `wallet` sats; every transaction is mined at once
    pub fn new(wallet: Sats, fee: Sats) -> Self {
        Self {
            state: Mutex::new(BitcoinState {
                height: GENESIS_HEIGHT,
                wallet,
                fee,
                auto_mine: true,
                counter: 0,
                txs: HashMap::new(),
                htlcs: HashMap::new(),
                fail_next: false,
            }),
        }
    }

    pub async fn mine(&self, blocks: u64) {
        let mut state = self.state.lock().await;
        let first = state.height + 1;
        state.height += blocks;
        for mined in state.txs.values_mut().filter(|m| m.is_none()) {
            *mined = Some(first);
        }
    }

    pub async fn height(&self) -> BlockHeight {
        self.state.lock().await.height
    }

    pub async fn wallet_balance(&self) -> Sats {
        self.state.lock().await.wallet
    }

    /// Leave new transactions unconfirmed until `mine` is called
    pub async fn set_auto_mine(&self, enabled: bool) {
        self.state.lock().await.auto_mine = enabled;
    }

    /// Fail the next mutating call with a transient RPC error
    pub async fn fail_next_call(&self) {
        self.state.lock().await.fail_next = true;
    }

    pub async fn htlc_hashlock(&self, address: &str) -> Option<Hash32> {
        self.state.lock().await.htlcs.get(address).map(|h| h.hashlock)
    }
}

#[async_trait]
impl ConfirmationSource for SimulatedBitcoin {
    async fn confirmations(&self, txid: &TxId) -> ChainResult<u32> {
        let state = self.state.lock().await;
        match state.txs.get(txid) {
            None => Err(ChainError::NotFound {
                what: format!("transaction {}", txid),
            }),
            Some(None) => Ok(0),
            Some(Some(mined)) => Ok((state.height - mined + 1) as u32),
        }
    }
}

#[async_trait]
impl BitcoinHtlc for SimulatedBitcoin {
    async fn create_htlc(
        &self,
        hashlock: &Hash32,
        claimer_pubkey: &str,
        timeout_blocks: u64,
    ) -> ChainResult<HtlcHandle> {
        let mut state = self.state.lock().await;
        state.take_failure()?;

        if claimer_pubkey.len() != 66 || hex::decode(claimer_pubkey).is_err() {
            return Err(ChainError::Script {
                message: "claimer public key must be 33 bytes of hex".to_string(),
            });
        }
        if timeout_blocks == 0 {
            return Err(ChainError::Script {
                message: "timeout must be at least one block".to_string(),
            });
        }

        state.counter += 1;
        let mut seed = hashlock.as_bytes().to_vec();
        seed.extend_from_slice(&state.counter.to_be_bytes());
        let tag = Hash32::sha256(&seed);
        let address = format!("bcrt1q{}", &tag.to_hex()[..38]);
        let timeout_height = state.height + timeout_blocks;

        state.htlcs.insert(
            address.clone(),
            SimHtlc {
                hashlock: *hashlock,
                timeout_height,
                balance: 0,
                funding: Vec::new(),
                claim_tx: None,
                refund_tx: None,
            },
        );

        Ok(HtlcHandle {
            address,
            script_hash: Some(tag.to_hex()),
            timeout_height,
        })
    }

    async fn fund_htlc(&self, address: &str, amount: Sats) -> ChainResult<TxId> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        state.htlc(address)?;

        let required = amount + state.fee;
        if state.wallet < required {
            return Err(ChainError::InsufficientFunds {
                required: required as u128,
                available: state.wallet as u128,
            });
        }
        state.wallet -= required;
        let txid = state.next_tx();
        let htlc = state.htlc(address)?;
        htlc.balance += amount;
        htlc.funding.push(txid.clone());
        Ok(txid)
    }

    async fn check_funding(&self, address: &str) -> ChainResult<FundingInfo> {
        let mut state = self.state.lock().await;
        let height = state.height;
        let htlc = state.htlc(address)?.clone();
        let utxos = if htlc.balance > 0 {
            htlc.funding
                .iter()
                .map(|txid| {
                    let confirmations = match state.txs.get(txid) {
                        Some(Some(mined)) => (height - mined + 1) as u32,
                        _ => 0,
                    };
                    Utxo {
                        txid: txid.clone(),
                        vout: 0,
                        amount: htlc.balance / htlc.funding.len() as u64,
                        confirmations,
                    }
                })
                .collect()
        } else {
            Vec::new()
        };
        Ok(FundingInfo {
            funded: htlc.balance > 0,
            amount: htlc.balance,
            utxos,
        })
    }

    async fn claim_htlc(&self, _order_id: &str, address: &str, preimage: &Secret) -> ChainResult<TxId> {
        let mut state = self.state.lock().await;
        state.take_failure()?;

        let htlc = state.htlc(address)?;
        if htlc.claim_tx.is_some() || htlc.refund_tx.is_some() {
            return Err(ChainError::invalid_state("HTLC output already spent"));
        }
        if htlc.balance == 0 {
            return Err(ChainError::invalid_state("HTLC is not funded"));
        }
        if preimage.hashlock() != htlc.hashlock {
            return Err(ChainError::PreimageMismatch {
                hashlock: htlc.hashlock.to_hex(),
            });
        }

        let txid = state.next_tx();
        let htlc = state.htlc(address)?;
        htlc.balance = 0;
        htlc.claim_tx = Some(txid.clone());
        Ok(txid)
    }

    async fn refund_htlc(&self, _order_id: &str, address: &str) -> ChainResult<TxId> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let height = state.height;

        let htlc = state.htlc(address)?;
        if htlc.claim_tx.is_some() || htlc.refund_tx.is_some() {
            return Err(ChainError::invalid_state("HTLC output already spent"));
        }
        if htlc.balance == 0 {
            return Err(ChainError::invalid_state("HTLC is not funded"));
        }
        if height < htlc.timeout_height {
            return Err(ChainError::Script {
                message: format!(
                    "non-final: locktime {} not reached at height {}",
                    htlc.timeout_height, height
                ),
            });
        }

        let refunded = htlc.balance;
        let txid = state.next_tx();
        let htlc = state.htlc(address)?;
        htlc.balance = 0;
        htlc.refund_tx = Some(txid.clone());
        state.wallet += refunded;
        Ok(txid)
    }

    async fn block_height(&self) -> ChainResult<BlockHeight> {
        Ok(self.state.lock().await.height)
    }

    async fn htlc_status(&self, address: &str) -> ChainResult<HtlcObservation> {
        let mut state = self.state.lock().await;
        let current_height = state.height;
        let htlc = state.htlc(address)?.clone();

        let status = if htlc.claim_tx.is_some() {
            ChainStatus::Claimed
        } else if htlc.refund_tx.is_some() {
            ChainStatus::Refunded
        } else if htlc.balance > 0 {
            ChainStatus::Funded
        } else {
            ChainStatus::Created
        };
        let spends = usize::from(htlc.claim_tx.is_some()) + usize::from(htlc.refund_tx.is_some());

        Ok(HtlcObservation {
            address: address.to_string(),
            balance: htlc.balance,
            status,
            tx_count: htlc.funding.len() + spends,
            claim_tx: htlc.claim_tx,
            refund_tx: htlc.refund_tx,
            current_height,
        })
    }
}

// =============================================================================
// Ethereum
// =============================================================================

#[derive(Debug, Clone)]
struct SimEscrow {
    params: EscrowParams,
    amount: Wei,
    active: bool,
    claimed: bool,
    refunded: bool,
}

#[derive(Debug)]
struct EthereumState {
    now: UnixSecs,
    balance: Wei,
    counter: u64,
    escrows: HashMap<String, SimEscrow>,
    by_order: HashMap<Hash32, String>,
    lop_orders: HashSet<Hash32>,
    fail_next: bool,
}

impl EthereumState {
    fn next_tx(&mut self) -> TxId {
        self.counter += 1;
        TxId::new(format!("0x{}", fake_txid("eth", self.counter)))
    }

    fn take_failure(&mut self) -> ChainResult<()> {
        if std::mem::take(&mut self.fail_next) {
            return Err(ChainError::rpc(Chain::Ethereum, "simulated nonce too low"));
        }
        Ok(())
    }

    fn escrow(&mut self, address: &str) -> ChainResult<&mut SimEscrow> {
        self.escrows
            .get_mut(&address.to_lowercase())
            .ok_or_else(|| ChainError::NotFound {
                what: format!("escrow {}", address),
            })
    }
}

#[derive(Debug)]
pub struct SimulatedEthereum {
    signer: String,
    state: Mutex<EthereumState>,
}

impl SimulatedEthereum {
    /// Signer holding `balance` wei with the clock at `now`
    pub fn new(balance: Wei, now: UnixSecs) -> Self {
        Self {
            signer: SIM_SIGNER.to_string(),
            state: Mutex::new(EthereumState {
                now,
                balance,
                counter: 0,
                escrows: HashMap::new(),
                by_order: HashMap::new(),
                lop_orders: HashSet::new(),
                fail_next: false,
            }),
        }
    }

    pub async fn advance_time(&self, secs: u64) {
        self.state.lock().await.now += secs;
    }

    pub async fn now(&self) -> UnixSecs {
        self.state.lock().await.now
    }

    pub async fn balance(&self) -> Wei {
        self.state.lock().await.balance
    }

    pub async fn fail_next_call(&self) {
        self.state.lock().await.fail_next = true;
    }

    pub async fn escrow_hashlock(&self, address: &str) -> Option<Hash32> {
        self.state
            .lock()
            .await
            .escrows
            .get(&address.to_lowercase())
            .map(|e| e.params.hashlock)
    }

    pub async fn escrow_count(&self) -> usize {
        self.state.lock().await.escrows.len()
    }
}

#[async_trait]
impl EthereumEscrow for SimulatedEthereum {
    fn signer(&self) -> &str {
        &self.signer
    }

    async fn create_escrow(&self, params: &EscrowParams) -> ChainResult<EscrowHandle> {
        let mut state = self.state.lock().await;
        state.take_failure()?;

        if state.by_order.contains_key(&params.order_hash) {
            return Err(ChainError::DuplicateEscrow {
                order_hash: params.order_hash.to_prefixed_hex(),
            });
        }
        if !is_eth_address(&params.maker) || !is_eth_address(&params.receiver) {
            return Err(ChainError::validation("maker and receiver must be 20-byte hex addresses"));
        }
        if params.timeout <= state.now {
            return Err(ChainError::invalid_state("escrow timeout is in the past"));
        }

        let tx = state.next_tx();
        let mut seed = params.order_hash.as_bytes().to_vec();
        seed.extend_from_slice(b"escrow");
        let address = format!("0x{}", &Hash32::keccak256(&seed).to_hex()[24..]);
        state.by_order.insert(params.order_hash, address.clone());
        state.escrows.insert(
            address.clone(),
            SimEscrow {
                params: params.clone(),
                amount: 0,
                active: false,
                claimed: false,
                refunded: false,
            },
        );
        Ok(EscrowHandle { address, tx })
    }

    async fn escrow_address(&self, order_hash: &Hash32) -> ChainResult<Option<String>> {
        Ok(self.state.lock().await.by_order.get(order_hash).cloned())
    }

    async fn fund_escrow(&self, escrow: &str, amount: Wei) -> ChainResult<TxId> {
        let mut state = self.state.lock().await;
        state.take_failure()?;

        if amount == 0 {
            return Err(ChainError::validation("escrow funding must be positive"));
        }
        let entry = state.escrow(escrow)?;
        if entry.active || entry.claimed || entry.refunded {
            return Err(ChainError::invalid_state("HTLC already created"));
        }
        if state.balance < amount {
            return Err(ChainError::InsufficientFunds {
                required: amount,
                available: state.balance,
            });
        }
        state.balance -= amount;
        let tx = state.next_tx();
        let entry = state.escrow(escrow)?;
        entry.amount = amount;
        entry.active = true;
        Ok(tx)
    }

    async fn claim_escrow(&self, escrow: &str, preimage: &Secret) -> ChainResult<TxId> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let now = state.now;

        let entry = state.escrow(escrow)?;
        if entry.claimed {
            return Err(ChainError::invalid_state("Already claimed"));
        }
        if !entry.active {
            return Err(ChainError::invalid_state("HTLC not active"));
        }
        if preimage.hashlock() != entry.params.hashlock {
            return Err(ChainError::PreimageMismatch {
                hashlock: entry.params.hashlock.to_hex(),
            });
        }
        if now >= entry.params.timeout {
            return Err(ChainError::invalid_state("HTLC expired"));
        }

        entry.claimed = true;
        entry.active = false;
        entry.amount = 0;
        Ok(state.next_tx())
    }

    async fn refund_escrow(&self, escrow: &str) -> ChainResult<TxId> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        let now = state.now;

        let entry = state.escrow(escrow)?;
        if !entry.active || entry.claimed {
            return Err(ChainError::invalid_state("HTLC not refundable"));
        }
        if now < entry.params.timeout {
            return Err(ChainError::invalid_state("Timelock not expired"));
        }

        let amount = entry.amount;
        entry.refunded = true;
        entry.active = false;
        entry.amount = 0;
        state.balance += amount;
        Ok(state.next_tx())
    }

    async fn escrow_status(&self, escrow: &str) -> ChainResult<EscrowObservation> {
        let mut state = self.state.lock().await;
        let entry = state.escrow(escrow)?.clone();
        Ok(EscrowObservation {
            address: escrow.to_string(),
            active: entry.active,
            amount: entry.amount,
            timeout: entry.params.timeout,
            claimed: entry.claimed,
            refunded: entry.refunded,
        })
    }

    async fn timestamp(&self) -> ChainResult<UnixSecs> {
        Ok(self.state.lock().await.now)
    }
}

#[async_trait]
impl OrderProtocol for SimulatedEthereum {
    async fn initiate_cross_chain_swap(
        &self,
        order_hash: &Hash32,
        bitcoin_amount: Sats,
        ethereum_amount: Wei,
    ) -> ChainResult<TxId> {
        let mut state = self.state.lock().await;
        state.take_failure()?;
        if bitcoin_amount == 0 || ethereum_amount == 0 {
            return Err(ChainError::validation("order amounts must be positive"));
        }
        if !state.lop_orders.insert(*order_hash) {
            return Err(ChainError::invalid_state("Order already exists"));
        }
        Ok(state.next_tx())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBKEY: &str = "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798";
    const RECEIVER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    #[tokio::test]
    async fn test_bitcoin_claim_needs_matching_preimage() {
        let btc = SimulatedBitcoin::new(1_000_000, 1_000);
        let secret = Secret::from_bytes([1u8; 32]);
        let htlc = btc.create_htlc(&secret.hashlock(), PUBKEY, 144).await.unwrap();
        btc.fund_htlc(&htlc.address, 100_000).await.unwrap();
        assert_eq!(btc.wallet_balance().await, 899_000);

        let wrong = Secret::from_bytes([2u8; 32]);
        let err = btc.claim_htlc("o", &htlc.address, &wrong).await.unwrap_err();
        assert!(matches!(err, ChainError::PreimageMismatch { .. }));

        btc.claim_htlc("o", &htlc.address, &secret).await.unwrap();
        let obs = btc.htlc_status(&htlc.address).await.unwrap();
        assert_eq!(obs.status, ChainStatus::Claimed);
        assert!(obs.claim_tx.is_some());
    }

    #[tokio::test]
    async fn test_bitcoin_refund_waits_for_locktime() {
        let btc = SimulatedBitcoin::new(1_000_000, 1_000);
        let htlc = btc
            .create_htlc(&Hash32::sha256(b"x"), PUBKEY, 10)
            .await
            .unwrap();
        btc.fund_htlc(&htlc.address, 50_000).await.unwrap();

        assert!(btc.refund_htlc("o", &htlc.address).await.is_err());
        btc.mine(10).await;
        btc.refund_htlc("o", &htlc.address).await.unwrap();
        assert_eq!(btc.wallet_balance().await, 999_000);
        assert!(btc.refund_htlc("o", &htlc.address).await.is_err());
    }

    #[tokio::test]
    async fn test_bitcoin_confirmations_and_funds() {
        let btc = SimulatedBitcoin::new(10_000, 1_000);
        btc.set_auto_mine(false).await;
        let htlc = btc.create_htlc(&Hash32::sha256(b"x"), PUBKEY, 10).await.unwrap();

        let err = btc.fund_htlc(&htlc.address, 9_500).await.unwrap_err();
        assert!(matches!(err, ChainError::InsufficientFunds { required: 10_500, available: 10_000 }));

        let txid = btc.fund_htlc(&htlc.address, 5_000).await.unwrap();
        assert_eq!(btc.confirmations(&txid).await.unwrap(), 0);
        btc.mine(3).await;
        assert_eq!(btc.confirmations(&txid).await.unwrap(), 3);
        assert!(btc.confirmations(&TxId::new("ff")).await.is_err());
    }

    #[tokio::test]
    async fn test_bitcoin_bad_script_parameters() {
        let btc = SimulatedBitcoin::new(10_000, 1_000);
        let err = btc.create_htlc(&Hash32::ZERO, "nothex", 10).await.unwrap_err();
        assert_eq!(err.error_code(), "script_error");
        let err = btc.create_htlc(&Hash32::ZERO, PUBKEY, 0).await.unwrap_err();
        assert_eq!(err.error_code(), "script_error");
    }

    fn params(order: &str, secret: &Secret, timeout: UnixSecs) -> EscrowParams {
        EscrowParams {
            order_hash: Hash32::keccak256(order.as_bytes()),
            maker: SIM_SIGNER.to_string(),
            receiver: RECEIVER.to_string(),
            hashlock: secret.hashlock(),
            timeout,
        }
    }

    #[tokio::test]
    async fn test_duplicate_escrow_keeps_first_address() {
        let eth = SimulatedEthereum::new(10u128.pow(18), 1_000);
        let secret = Secret::from_bytes([3u8; 32]);
        let p = params("order-1", &secret, 5_000);

        let first = eth.create_escrow(&p).await.unwrap();
        let err = eth.create_escrow(&p).await.unwrap_err();
        assert!(matches!(err, ChainError::DuplicateEscrow { .. }));
        assert_eq!(eth.escrow_address(&p.order_hash).await.unwrap(), Some(first.address));
        assert_eq!(eth.escrow_count().await, 1);
    }

    #[tokio::test]
    async fn test_escrow_mismatch_leaves_state_unchanged() {
        let eth = SimulatedEthereum::new(10u128.pow(18), 1_000);
        let secret = Secret::from_bytes([4u8; 32]);
        let escrow = eth.create_escrow(&params("order-2", &secret, 5_000)).await.unwrap();
        eth.fund_escrow(&escrow.address, 10u128.pow(16)).await.unwrap();

        let err = eth
            .claim_escrow(&escrow.address, &Secret::from_bytes([5u8; 32]))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::PreimageMismatch { .. }));

        let status = eth.escrow_status(&escrow.address).await.unwrap();
        assert!(!status.claimed);
        assert!(status.active);
        assert_eq!(status.status(), ChainStatus::Funded);
    }

    #[tokio::test]
    async fn test_escrow_refund_after_timeout() {
        let eth = SimulatedEthereum::new(10u128.pow(18), 1_000);
        let secret = Secret::from_bytes([6u8; 32]);
        let escrow = eth.create_escrow(&params("order-3", &secret, 2_000)).await.unwrap();
        eth.fund_escrow(&escrow.address, 500).await.unwrap();

        assert!(eth.refund_escrow(&escrow.address).await.is_err());
        eth.advance_time(1_000).await;
        // Claim window closed at the timeout
        assert!(eth.claim_escrow(&escrow.address, &secret).await.is_err());
        eth.refund_escrow(&escrow.address).await.unwrap();

        let status = eth.escrow_status(&escrow.address).await.unwrap();
        assert_eq!(status.status(), ChainStatus::Refunded);
        assert_eq!(eth.balance().await, 10u128.pow(18));
    }

    #[tokio::test]
    async fn test_injected_failure_is_one_shot() {
        let eth = SimulatedEthereum::new(10u128.pow(18), 1_000);
        eth.fail_next_call().await;
        let p = params("order-4", &Secret::from_bytes([7u8; 32]), 5_000);
        assert!(eth.create_escrow(&p).await.unwrap_err().is_transient());
        assert!(eth.create_escrow(&p).await.is_ok());
    }

    #[tokio::test]
    async fn test_order_protocol_registration() {
        let eth = SimulatedEthereum::new(0, 1_000);
        let hash = Hash32::keccak256(b"order-5");
        eth.initiate_cross_chain_swap(&hash, 100_000, 1).await.unwrap();
        assert!(eth.initiate_cross_chain_swap(&hash, 100_000, 1).await.is_err());
    }
}
