//! Swap coordinator
//!
//! Drives HTLC/escrow pairs through the phase machine:
//!
//! 1. lock BTC in an HTLC with `hashlock = sha256(preimage)` and timeout T_btc
//! 2. lock ETH in an escrow with the same hashlock and timeout T_eth < T_btc
//! 3. reveal the preimage by claiming the escrow
//! 4. claim the HTLC with the now-public preimage
//!
//! `execute` runs steps 1-2, `complete` runs 3-4 and `refund` is the
//! timeout path. Partial orders run the same steps once per resolver fill,
//! concurrently, each with its own secret.
//!
//! Every record mutation goes through [`SwapCoordinator::mutate`], which
//! holds the record lock only for load-apply-store. Chain calls and
//! confirmation waits happen outside it.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use portal_core::{
    wait_for_confirmations, AppConfig, BitcoinHtlc, Chain, ChainError, ChainResult, ChainStatus,
    is_valid_order_id, CoordinatorConfig, EscrowParams, EthereumEscrow, Hash32, OrderProtocol, Sats,
    Secret, SwapId, SwapMode, Wei, MAX_ORDER_ID_LEN,
};
use tokio::sync::{watch, Mutex};

use crate::error::{SwapError, SwapResult};
use crate::merkle::{self, MerkleTree};
use crate::partial::{
    aggregate_leg_statuses, default_resolvers, fill_order_hash, pro_rate, FillLedger, FillRecord,
    PartialOrder, ResolverAssignment,
};
use crate::retry::with_retry;
use crate::secrets::{generate_chunk_secrets, generate_simple_commitment};
use crate::state::{LegPair, RecordedError, SwapPhase, SwapRecord};
use crate::store::SwapStore;

/// Knobs the coordinator needs from the application config
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub timeouts: CoordinatorConfig,
    pub claimer_pubkey: String,
    pub confirmations: u32,
    pub confirmation_poll: Duration,
    pub confirmation_timeout: Duration,
}

impl CoordinatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            timeouts: config.coordinator.clone(),
            claimer_pubkey: config.bitcoin.claimer_pubkey.clone(),
            confirmations: config.bitcoin.confirmations,
            confirmation_poll: Duration::from_secs(config.bitcoin.confirmation_poll_secs),
            confirmation_timeout: Duration::from_secs(config.bitcoin.confirmation_timeout_secs),
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Validated request to open a swap
#[derive(Debug, Clone)]
pub struct SwapRequest {
    pub order_id: String,
    pub bitcoin_amount: Sats,
    pub ethereum_amount: Wei,
    /// Receives the Ethereum escrow in simple and limit-order modes
    pub user_address: String,
    pub mode: Option<SwapMode>,
    /// Partial mode only; defaults to four resolvers covering the order
    pub resolvers: Option<Vec<ResolverAssignment>>,
}

/// Which HTLC/escrow pair of a record an operation works on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Main,
    Fill(usize),
}

fn legs_mut(record: &mut SwapRecord, target: Target) -> SwapResult<&mut LegPair> {
    match target {
        Target::Main => Ok(&mut record.legs),
        Target::Fill(i) => record
            .partial
            .as_mut()
            .and_then(|order| order.fills.get_mut(i))
            .map(|fill| &mut fill.legs)
            .ok_or_else(|| SwapError::NotFound(format!("fill {} of {}", i, record.swap_id))),
    }
}

fn legs_ref(record: &SwapRecord, target: Target) -> SwapResult<&LegPair> {
    match target {
        Target::Main => Ok(&record.legs),
        Target::Fill(i) => record
            .partial
            .as_ref()
            .and_then(|order| order.fills.get(i))
            .map(|fill| &fill.legs)
            .ok_or_else(|| SwapError::NotFound(format!("fill {} of {}", i, record.swap_id))),
    }
}

/// Chain parameters for one pair
struct PairPlan {
    label: String,
    hashlock: Hash32,
    order_hash: Hash32,
    receiver: String,
    bitcoin_amount: Sats,
    ethereum_amount: Wei,
}

/// How a setup run ended when it did not fail outright
enum SetupEnd {
    Funded,
    /// Confirmation wait timed out; the pair stays refundable
    TimedOut,
    Abandoned,
}

pub(crate) fn is_eth_address(s: &str) -> bool {
    s.strip_prefix("0x")
        .map(|h| h.len() == 40 && h.chars().all(|c| c.is_ascii_hexdigit()))
        .unwrap_or(false)
}

pub fn validate_order_id(order_id: &str) -> SwapResult<()> {
    if is_valid_order_id(order_id) {
        return Ok(());
    }
    Err(SwapError::validation(format!(
        "orderId must be 1-{} characters from letters, digits, '-', '_' and '.'",
        MAX_ORDER_ID_LEN
    )))
}

pub struct SwapCoordinator {
    bitcoin: Arc<dyn BitcoinHtlc>,
    ethereum: Arc<dyn EthereumEscrow>,
    order_protocol: Option<Arc<dyn OrderProtocol>>,
    store: Arc<dyn SwapStore>,
    settings: CoordinatorSettings,
    /// One lock per swap; swaps never wait on each other
    record_locks: Mutex<HashMap<SwapId, Arc<Mutex<()>>>>,
    /// Order ids between the duplicate check and the first store write
    reserved_orders: Mutex<HashSet<String>>,
    cancels: Mutex<HashMap<SwapId, watch::Sender<bool>>>,
}

impl SwapCoordinator {
    pub fn new(
        bitcoin: Arc<dyn BitcoinHtlc>,
        ethereum: Arc<dyn EthereumEscrow>,
        store: Arc<dyn SwapStore>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            bitcoin,
            ethereum,
            order_protocol: None,
            store,
            settings,
            record_locks: Mutex::new(HashMap::new()),
            reserved_orders: Mutex::new(HashSet::new()),
            cancels: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_order_protocol(mut self, protocol: Arc<dyn OrderProtocol>) -> Self {
        self.order_protocol = Some(protocol);
        self
    }

    pub fn settings(&self) -> &CoordinatorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn SwapStore> {
        &self.store
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Open a swap and lock funds on both chains.
    ///
    /// A confirmation timeout or an abandon during setup is not an error:
    /// the returned record carries the reached phase and stays refundable.
    pub async fn execute(&self, request: SwapRequest) -> SwapResult<SwapRecord> {
        let mode = request.mode.unwrap_or(self.settings.timeouts.default_mode);
        self.validate_request(&request, mode)?;

        let now = Utc::now();
        let swap_id = SwapId::generate(now.timestamp_millis(), &request.order_id);
        if self.store.get(&swap_id).await?.is_some() {
            return Err(SwapError::validation(format!("swap {} already exists", swap_id)));
        }

        let mut record = SwapRecord::new(
            swap_id.clone(),
            &request.order_id,
            mode,
            &request.user_address,
            request.bitcoin_amount,
            request.ethereum_amount,
            now,
        );

        let mut plans = Vec::new();
        match mode {
            SwapMode::Simple | SwapMode::LimitOrder => {
                let (preimage, hashlock) = generate_simple_commitment()?;
                record.preimage = Some(preimage);
                record.preimage_hash = Some(hashlock);
                plans.push((
                    Target::Main,
                    PairPlan {
                        label: request.order_id.clone(),
                        hashlock,
                        order_hash: Hash32::keccak256(request.order_id.as_bytes()),
                        receiver: request.user_address.clone(),
                        bitcoin_amount: request.bitcoin_amount,
                        ethereum_amount: request.ethereum_amount,
                    },
                ));
            }
            SwapMode::Partial => {
                let resolvers = request.resolvers.clone().unwrap_or_else(default_resolvers);
                let order = self.plan_partial(&request, &resolvers, now)?;
                for (i, fill) in order.fills.iter().enumerate() {
                    plans.push((
                        Target::Fill(i),
                        PairPlan {
                            label: fill.resolver.clone(),
                            hashlock: fill.hashlock,
                            order_hash: fill_order_hash(&request.order_id, &fill.resolver),
                            receiver: fill.resolver_address.clone(),
                            bitcoin_amount: fill.bitcoin_amount,
                            ethereum_amount: fill.ethereum_amount,
                        },
                    ));
                }
                record.partial = Some(order);
            }
        }

        if !self.reserved_orders.lock().await.insert(request.order_id.clone()) {
            return Err(SwapError::validation(format!(
                "order {} is already being opened",
                request.order_id
            )));
        }
        let opened = self.open_record(&mut record, &plans, now).await;
        self.reserved_orders.lock().await.remove(&request.order_id);
        opened?;
        tracing::info!(
            swap_id = %swap_id,
            order_id = %request.order_id,
            mode = %mode,
            bitcoin_sats = request.bitcoin_amount,
            ethereum_wei = %request.ethereum_amount,
            pairs = plans.len(),
            "Swap initiated"
        );

        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.cancels.lock().await.insert(swap_id.clone(), cancel_tx);

        let result = self.run_setup(&swap_id, mode, &plans, cancel_rx).await;
        self.cancels.lock().await.remove(&swap_id);
        result?;

        self.load(&swap_id).await
    }

    /// Reveal on Ethereum, then claim Bitcoin with the same preimage
    pub async fn complete(&self, swap_id: &SwapId) -> SwapResult<SwapRecord> {
        let record = self.load(swap_id).await?;
        self.ensure_drivable(&record)?;

        match &record.partial {
            None => {
                let preimage = record
                    .preimage
                    .clone()
                    .ok_or_else(|| SwapError::validation("swap has no stored preimage"))?;
                self.claim_pair(swap_id, &record.order_id, Target::Main, &preimage)
                    .await?;
            }
            Some(order) => {
                let mut claims = Vec::new();
                for (i, fill) in order.fills.iter().enumerate() {
                    if !matches!(
                        fill.legs.phase,
                        SwapPhase::EthereumFunded | SwapPhase::PreimageRevealed
                    ) {
                        continue;
                    }
                    let secret = order.verified_secret(fill)?.clone();
                    claims.push((i, secret));
                }
                if claims.is_empty() {
                    return Err(SwapError::InvalidTransition {
                        from: record.phase(),
                        to: SwapPhase::PreimageRevealed,
                    });
                }

                let results = join_all(claims.iter().map(|(i, secret)| {
                    self.claim_pair(swap_id, &record.order_id, Target::Fill(*i), secret)
                }))
                .await;
                let failures: Vec<SwapError> = results.into_iter().filter_map(Result::err).collect();
                if failures.len() == claims.len() {
                    if let Some(first) = failures.into_iter().next() {
                        return Err(first);
                    }
                }
            }
        }

        let record = self.load(swap_id).await?;
        tracing::info!(
            swap_id = %swap_id,
            status = %record.overall_status,
            "Swap completion finished"
        );
        Ok(record)
    }

    /// Refund every leg whose timelock has expired.
    ///
    /// The pair moves to TIMEOUT_REFUNDED once nothing is left locked.
    /// Returns `TimelockActive` when a funded leg cannot be refunded yet.
    pub async fn refund(&self, swap_id: &SwapId) -> SwapResult<SwapRecord> {
        let record = self.load(swap_id).await?;
        if matches!(record.phase(), SwapPhase::BothClaimed | SwapPhase::TimeoutRefunded) {
            return Err(SwapError::Terminal {
                swap_id: swap_id.to_string(),
                phase: record.phase(),
            });
        }

        match &record.partial {
            None => self.refund_pair(swap_id, &record.order_id, Target::Main).await?,
            Some(order) => {
                let targets: Vec<Target> = order
                    .fills
                    .iter()
                    .enumerate()
                    .filter(|(_, f)| {
                        !matches!(f.legs.phase, SwapPhase::BothClaimed | SwapPhase::TimeoutRefunded)
                    })
                    .map(|(i, _)| Target::Fill(i))
                    .collect();
                let results = join_all(
                    targets
                        .iter()
                        .map(|t| self.refund_pair(swap_id, &record.order_id, *t)),
                )
                .await;
                let failures: Vec<SwapError> = results.into_iter().filter_map(Result::err).collect();
                if !failures.is_empty() && failures.len() == targets.len() {
                    if let Some(first) = failures.into_iter().next() {
                        return Err(first);
                    }
                }
            }
        }

        self.load(swap_id).await
    }

    /// Stop driving a swap. Funds stay refundable through [`Self::refund`].
    pub async fn abandon(&self, swap_id: &SwapId) -> SwapResult<SwapRecord> {
        let record = self
            .mutate(swap_id, |r| {
                if r.is_terminal() {
                    return Err(SwapError::Terminal {
                        swap_id: r.swap_id.to_string(),
                        phase: r.phase(),
                    });
                }
                r.abandoned = true;
                Ok(())
            })
            .await?;

        if let Some(cancel) = self.cancels.lock().await.get(swap_id) {
            cancel.send_replace(true);
        }
        tracing::info!(swap_id = %swap_id, phase = %record.phase(), "Swap abandoned");
        Ok(record)
    }

    pub async fn get(&self, swap_id: &SwapId) -> SwapResult<SwapRecord> {
        self.load(swap_id).await
    }

    // =========================================================================
    // Setup
    // =========================================================================

    fn validate_request(&self, request: &SwapRequest, mode: SwapMode) -> SwapResult<()> {
        validate_order_id(&request.order_id)?;
        if request.bitcoin_amount == 0 || request.ethereum_amount == 0 {
            return Err(SwapError::validation("both amounts must be positive"));
        }
        if mode != SwapMode::Partial && !is_eth_address(&request.user_address) {
            return Err(SwapError::validation(format!(
                "userAddress '{}' is not an Ethereum address",
                request.user_address
            )));
        }
        if mode == SwapMode::LimitOrder && self.order_protocol.is_none() {
            return Err(SwapError::validation("limit order protocol is not configured"));
        }

        let timeouts = &self.settings.timeouts;
        if timeouts.bitcoin_timeout_secs() <= timeouts.ethereum_timeout_secs {
            return Err(SwapError::TimelockOrdering {
                bitcoin_secs: timeouts.bitcoin_timeout_secs(),
                ethereum_secs: timeouts.ethereum_timeout_secs,
            });
        }
        Ok(())
    }

    /// Refuse a reused order id before any funds move, then write the
    /// initial record
    async fn open_record(
        &self,
        record: &mut SwapRecord,
        plans: &[(Target, PairPlan)],
        now: chrono::DateTime<Utc>,
    ) -> SwapResult<()> {
        let listing = self.store.list().await?;
        if let Some(existing) = listing.records.iter().find(|r| r.order_id == record.order_id) {
            return Err(SwapError::validation(format!(
                "order {} is already used by swap {}",
                record.order_id, existing.swap_id
            )));
        }

        let eth = self.ethereum.as_ref();
        for (_, plan) in plans {
            let order_hash = &plan.order_hash;
            let existing = with_retry("escrow_address", move || eth.escrow_address(order_hash)).await?;
            if existing.is_some() {
                return Err(ChainError::DuplicateEscrow {
                    order_hash: order_hash.to_prefixed_hex(),
                }
                .into());
            }
        }

        record.refresh(now);
        self.store.put(record).await?;
        Ok(())
    }

    fn plan_partial(
        &self,
        request: &SwapRequest,
        resolvers: &[ResolverAssignment],
        now: chrono::DateTime<Utc>,
    ) -> SwapResult<PartialOrder> {
        if resolvers.is_empty() {
            return Err(SwapError::validation("partial swaps need at least one resolver"));
        }

        let mut ledger = FillLedger::new();
        for resolver in resolvers {
            if !is_eth_address(&resolver.address) {
                return Err(SwapError::validation(format!(
                    "resolver '{}' address is not an Ethereum address",
                    resolver.name
                )));
            }
            ledger.add(resolver.range)?;
        }

        let chunks = generate_chunk_secrets()?;
        let tree = MerkleTree::build(&chunks.hashed)?;
        let root = tree.root();
        let amounts = pro_rate(ledger.ranges(), request.bitcoin_amount, request.ethereum_amount);

        let mut fills = Vec::with_capacity(resolvers.len());
        for (resolver, (btc, eth)) in resolvers.iter().zip(amounts) {
            if btc == 0 || eth == 0 {
                return Err(SwapError::validation(format!(
                    "{} share of the order rounds to zero",
                    resolver.name
                )));
            }
            let index = resolver.range.secret_index();
            let proof = tree.proof(index)?;
            let secret = chunks
                .secrets
                .get(index as usize)
                .ok_or(SwapError::Merkle { index })?;
            if !merkle::verify_chunk(index, secret, &proof, &root) {
                return Err(SwapError::Merkle { index });
            }

            fills.push(FillRecord {
                resolver: resolver.name.clone(),
                resolver_address: resolver.address.clone(),
                range: resolver.range,
                secret_index: index,
                hashlock: secret.hashlock(),
                proof,
                bitcoin_amount: btc,
                ethereum_amount: eth,
                legs: LegPair::new(now),
            });
        }

        tracing::debug!(
            order_id = %request.order_id,
            merkle_root = %root,
            fills = fills.len(),
            covered = ledger.covered(),
            "Planned partial order"
        );

        Ok(PartialOrder {
            merkle_root: root,
            secrets: chunks.secrets,
            fills,
        })
    }

    async fn run_setup(
        &self,
        swap_id: &SwapId,
        mode: SwapMode,
        plans: &[(Target, PairPlan)],
        cancel: watch::Receiver<bool>,
    ) -> SwapResult<()> {
        if mode == SwapMode::LimitOrder {
            if let Some((_, plan)) = plans.first() {
                self.register_limit_order(swap_id, plan).await?;
            }
        }

        if mode != SwapMode::Partial {
            return match plans.first() {
                Some((target, plan)) => self
                    .setup_pair(swap_id, *target, plan, cancel)
                    .await
                    .map(|_| ()),
                None => Ok(()),
            };
        }

        // Each resolver's pair runs independently; one failing does not
        // roll back the others.
        let results = join_all(
            plans
                .iter()
                .map(|(target, plan)| self.setup_pair(swap_id, *target, plan, cancel.clone())),
        )
        .await;

        let mut first_error = None;
        let mut any_live = false;
        for result in results {
            match result {
                Ok(_) => any_live = true,
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match (any_live, first_error) {
            (false, Some(e)) => Err(e),
            _ => Ok(()),
        }
    }

    async fn register_limit_order(&self, swap_id: &SwapId, plan: &PairPlan) -> SwapResult<()> {
        let Some(protocol) = self.order_protocol.as_deref() else {
            return Err(SwapError::validation("limit order protocol is not configured"));
        };
        let order_hash = &plan.order_hash;
        let (btc, eth) = (plan.bitcoin_amount, plan.ethereum_amount);

        let tx = self
            .run_step(swap_id, Target::Main, "initiate_cross_chain_swap", move || {
                protocol.initiate_cross_chain_swap(order_hash, btc, eth)
            })
            .await?;

        self.mutate(swap_id, |r| {
            r.legs.ethereum.lop_txid = Some(tx.clone());
            r.legs.ethereum.order_hash = Some(*order_hash);
            Ok(())
        })
        .await?;
        tracing::info!(swap_id = %swap_id, order_hash = %order_hash, txid = %tx, "Registered limit order");
        Ok(())
    }

    /// Steps 1-2 for one pair: HTLC, funding, confirmations, escrow, funding
    async fn setup_pair(
        &self,
        swap_id: &SwapId,
        target: Target,
        plan: &PairPlan,
        mut cancel: watch::Receiver<bool>,
    ) -> SwapResult<SetupEnd> {
        let btc = self.bitcoin.as_ref();
        let eth = self.ethereum.as_ref();
        let timeouts = &self.settings.timeouts;

        // ─── Bitcoin HTLC ───────────────────────────────────────────────────

        if *cancel.borrow() {
            return Ok(SetupEnd::Abandoned);
        }
        let hashlock = &plan.hashlock;
        let pubkey = self.settings.claimer_pubkey.as_str();
        let blocks = timeouts.bitcoin_timeout_blocks;
        let htlc = self
            .run_step(swap_id, target, "create_htlc", move || {
                btc.create_htlc(hashlock, pubkey, blocks)
            })
            .await?;

        self.mutate(swap_id, |r| {
            let legs = legs_mut(r, target)?;
            legs.bitcoin.htlc_address = Some(htlc.address.clone());
            legs.bitcoin.script_hash = htlc.script_hash.clone();
            legs.bitcoin.hashlock = Some(*hashlock);
            legs.bitcoin.timeout_height = Some(htlc.timeout_height);
            legs.bitcoin.status = ChainStatus::Created;
            legs.advance(SwapPhase::BitcoinHtlcCreated, None, Utc::now())
        })
        .await?;
        tracing::info!(
            swap_id = %swap_id,
            pair = %plan.label,
            htlc = %htlc.address,
            timeout_height = htlc.timeout_height,
            "Bitcoin HTLC created"
        );

        if *cancel.borrow() {
            return Ok(SetupEnd::Abandoned);
        }
        let address = htlc.address.as_str();
        let amount = plan.bitcoin_amount;
        // Funding is checked before each attempt so a retry never double-funds
        let funding_txid = self
            .run_step(swap_id, target, "fund_htlc", move || async move {
                let funding = btc.check_funding(address).await?;
                if let Some(utxo) = funding.utxos.first() {
                    return Ok(utxo.txid.clone());
                }
                btc.fund_htlc(address, amount).await
            })
            .await?;

        self.mutate(swap_id, |r| {
            legs_mut(r, target)?.bitcoin.funding_txid = Some(funding_txid.clone());
            Ok(())
        })
        .await?;

        match wait_for_confirmations(
            btc,
            &funding_txid,
            self.settings.confirmations,
            self.settings.confirmation_timeout,
            self.settings.confirmation_poll,
            &mut cancel,
        )
        .await
        {
            Ok(_) => {}
            Err(ChainError::Cancelled) => return Ok(SetupEnd::Abandoned),
            Err(e @ ChainError::Timeout { .. }) => {
                let err = SwapError::from(e);
                tracing::warn!(swap_id = %swap_id, pair = %plan.label, error = %err, "Funding not confirmed, swap left refundable");
                self.mutate(swap_id, |r| {
                    legs_mut(r, target)?.last_error = Some(RecordedError::from(&err));
                    Ok(())
                })
                .await?;
                return Ok(SetupEnd::TimedOut);
            }
            Err(e) => {
                let err = SwapError::from(e);
                self.fail_pair(swap_id, target, &err).await;
                return Err(err);
            }
        }

        self.mutate(swap_id, |r| {
            let legs = legs_mut(r, target)?;
            legs.bitcoin.status = ChainStatus::Funded;
            legs.advance(SwapPhase::BitcoinFunded, Some(funding_txid.clone()), Utc::now())
        })
        .await?;
        tracing::info!(swap_id = %swap_id, pair = %plan.label, txid = %funding_txid, "Bitcoin HTLC funded");

        // ─── Ethereum escrow ────────────────────────────────────────────────

        if *cancel.borrow() {
            return Ok(SetupEnd::Abandoned);
        }
        let now = self
            .run_step(swap_id, target, "timestamp", move || eth.timestamp())
            .await?;
        let params = EscrowParams {
            order_hash: plan.order_hash,
            maker: eth.signer().to_string(),
            receiver: plan.receiver.clone(),
            hashlock: plan.hashlock,
            timeout: now + timeouts.ethereum_timeout_secs,
        };
        let params_ref = &params;
        let escrow = self
            .run_step(swap_id, target, "create_escrow", move || {
                eth.create_escrow(params_ref)
            })
            .await?;

        self.mutate(swap_id, |r| {
            let legs = legs_mut(r, target)?;
            legs.ethereum.escrow_address = Some(escrow.address.clone());
            legs.ethereum.order_hash = Some(params.order_hash);
            legs.ethereum.hashlock = Some(params.hashlock);
            legs.ethereum.timeout = Some(params.timeout);
            legs.ethereum.create_txid = Some(escrow.tx.clone());
            legs.ethereum.status = ChainStatus::Created;
            legs.advance(SwapPhase::EthereumEscrowCreated, Some(escrow.tx.clone()), Utc::now())
        })
        .await?;
        tracing::info!(
            swap_id = %swap_id,
            pair = %plan.label,
            escrow = %escrow.address,
            timeout = params.timeout,
            "Ethereum escrow created"
        );

        if *cancel.borrow() {
            return Ok(SetupEnd::Abandoned);
        }
        let escrow_address = escrow.address.as_str();
        let wei = plan.ethereum_amount;
        let fund_tx = self
            .run_step(swap_id, target, "fund_escrow", move || {
                eth.fund_escrow(escrow_address, wei)
            })
            .await?;

        self.mutate(swap_id, |r| {
            let legs = legs_mut(r, target)?;
            legs.ethereum.funding_txid = Some(fund_tx.clone());
            legs.ethereum.status = ChainStatus::Funded;
            legs.advance(SwapPhase::EthereumFunded, Some(fund_tx.clone()), Utc::now())
        })
        .await?;
        tracing::info!(swap_id = %swap_id, pair = %plan.label, txid = %fund_tx, "Ethereum escrow funded");

        Ok(SetupEnd::Funded)
    }

    // =========================================================================
    // Claim and refund
    // =========================================================================

    fn ensure_drivable(&self, record: &SwapRecord) -> SwapResult<()> {
        if record.is_terminal() {
            return Err(SwapError::Terminal {
                swap_id: record.swap_id.to_string(),
                phase: record.phase(),
            });
        }
        if record.abandoned {
            return Err(SwapError::Abandoned(record.swap_id.to_string()));
        }
        Ok(())
    }

    /// Steps 3-4 for one pair; resumes from PREIMAGE_REVEALED
    async fn claim_pair(
        &self,
        swap_id: &SwapId,
        order_id: &str,
        target: Target,
        secret: &Secret,
    ) -> SwapResult<()> {
        let record = self.load(swap_id).await?;
        let legs = legs_ref(&record, target)?.clone();
        let btc = self.bitcoin.as_ref();
        let eth = self.ethereum.as_ref();

        match legs.phase {
            SwapPhase::EthereumFunded => {
                let escrow = legs
                    .ethereum
                    .escrow_address
                    .as_deref()
                    .ok_or_else(|| SwapError::validation("escrow address missing"))?;
                let tx = self
                    .run_step(swap_id, target, "claim_escrow", move || {
                        eth.claim_escrow(escrow, secret)
                    })
                    .await?;
                self.mutate(swap_id, |r| {
                    let legs = legs_mut(r, target)?;
                    legs.ethereum.claim_tx = Some(tx.clone());
                    legs.ethereum.status = ChainStatus::Claimed;
                    legs.advance(SwapPhase::PreimageRevealed, Some(tx.clone()), Utc::now())
                })
                .await?;
                tracing::info!(swap_id = %swap_id, txid = %tx, "Preimage revealed on Ethereum");
            }
            SwapPhase::PreimageRevealed => {}
            from if from.is_terminal() => {
                return Err(SwapError::Terminal {
                    swap_id: swap_id.to_string(),
                    phase: from,
                })
            }
            from => {
                return Err(SwapError::InvalidTransition {
                    from,
                    to: SwapPhase::PreimageRevealed,
                })
            }
        }

        let htlc = legs
            .bitcoin
            .htlc_address
            .as_deref()
            .ok_or_else(|| SwapError::validation("HTLC address missing"))?;
        let tx = self
            .run_step(swap_id, target, "claim_htlc", move || {
                btc.claim_htlc(order_id, htlc, secret)
            })
            .await?;
        self.mutate(swap_id, |r| {
            let legs = legs_mut(r, target)?;
            legs.bitcoin.claim_tx = Some(tx.clone());
            legs.bitcoin.status = ChainStatus::Claimed;
            legs.advance(SwapPhase::BothClaimed, Some(tx.clone()), Utc::now())
        })
        .await?;
        tracing::info!(swap_id = %swap_id, txid = %tx, "Bitcoin HTLC claimed");
        Ok(())
    }

    async fn refund_pair(&self, swap_id: &SwapId, order_id: &str, target: Target) -> SwapResult<()> {
        let record = self.load(swap_id).await?;
        let legs = legs_ref(&record, target)?.clone();
        let btc = self.bitcoin.as_ref();
        let eth = self.ethereum.as_ref();
        let mut blocked = None;

        if legs.ethereum_locked() {
            if let (Some(escrow), Some(timeout)) =
                (legs.ethereum.escrow_address.as_deref(), legs.ethereum.timeout)
            {
                let now = self
                    .run_step(swap_id, target, "timestamp", move || eth.timestamp())
                    .await?;
                if now >= timeout {
                    let tx = self
                        .run_step(swap_id, target, "refund_escrow", move || eth.refund_escrow(escrow))
                        .await?;
                    self.mutate(swap_id, |r| {
                        let legs = legs_mut(r, target)?;
                        legs.ethereum.refund_tx = Some(tx.clone());
                        legs.ethereum.status = ChainStatus::Refunded;
                        Ok(())
                    })
                    .await?;
                    tracing::info!(swap_id = %swap_id, txid = %tx, "Ethereum escrow refunded");
                } else {
                    blocked = Some(SwapError::TimelockActive {
                        chain: Chain::Ethereum,
                        until: timeout,
                    });
                }
            }
        }

        if legs.bitcoin_locked() {
            if let (Some(htlc), Some(timeout_height)) =
                (legs.bitcoin.htlc_address.as_deref(), legs.bitcoin.timeout_height)
            {
                let height = self
                    .run_step(swap_id, target, "block_height", move || btc.block_height())
                    .await?;
                if height >= timeout_height {
                    let tx = self
                        .run_step(swap_id, target, "refund_htlc", move || {
                            btc.refund_htlc(order_id, htlc)
                        })
                        .await?;
                    self.mutate(swap_id, |r| {
                        let legs = legs_mut(r, target)?;
                        legs.bitcoin.refund_tx = Some(tx.clone());
                        legs.bitcoin.status = ChainStatus::Refunded;
                        Ok(())
                    })
                    .await?;
                    tracing::info!(swap_id = %swap_id, txid = %tx, "Bitcoin HTLC refunded");
                } else {
                    blocked.get_or_insert(SwapError::TimelockActive {
                        chain: Chain::Bitcoin,
                        until: timeout_height,
                    });
                }
            }
        }

        let record = self
            .mutate(swap_id, |r| {
                let legs = legs_mut(r, target)?;
                if !legs.bitcoin_locked()
                    && !legs.ethereum_locked()
                    && legs.phase.can_transition(SwapPhase::TimeoutRefunded)
                {
                    legs.advance(SwapPhase::TimeoutRefunded, None, Utc::now())?;
                }
                Ok(())
            })
            .await?;

        match blocked {
            Some(err) => Err(err),
            None => {
                tracing::debug!(swap_id = %swap_id, phase = %record.phase(), "Refund pass finished");
                Ok(())
            }
        }
    }

    // =========================================================================
    // Plumbing
    // =========================================================================

    async fn load(&self, swap_id: &SwapId) -> SwapResult<SwapRecord> {
        self.store
            .get(swap_id)
            .await?
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))
    }

    /// Load, apply `f`, recompute derived fields, store. Nothing is written
    /// when `f` fails.
    async fn mutate<F>(&self, swap_id: &SwapId, f: F) -> SwapResult<SwapRecord>
    where
        F: FnOnce(&mut SwapRecord) -> SwapResult<()>,
    {
        let lock = self
            .record_locks
            .lock()
            .await
            .entry(swap_id.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;
        let mut record = self.load(swap_id).await?;
        f(&mut record)?;

        let now = Utc::now();
        sync_aggregate(&mut record, now)?;
        record.refresh(now);
        self.store.put(&record).await?;
        if record.is_terminal() {
            self.record_locks.lock().await.remove(swap_id);
        }
        Ok(record)
    }

    /// Adapter call with one retry on transient errors; a final failure
    /// moves the pair to ERROR.
    async fn run_step<T, F, Fut>(
        &self,
        swap_id: &SwapId,
        target: Target,
        what: &str,
        op: F,
    ) -> SwapResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ChainResult<T>>,
    {
        match with_retry(what, op).await {
            Ok(value) => Ok(value),
            Err(e) => {
                let err = SwapError::from(e);
                tracing::error!(swap_id = %swap_id, operation = what, error = %err, "Swap step failed");
                self.fail_pair(swap_id, target, &err).await;
                Err(err)
            }
        }
    }

    async fn fail_pair(&self, swap_id: &SwapId, target: Target, err: &SwapError) {
        let result = self
            .mutate(swap_id, |r| {
                legs_mut(r, target)?.fail(err, Utc::now());
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::error!(swap_id = %swap_id, error = %e, "Could not record swap failure");
        }
    }
}

/// Keep a partial record's top-level legs in step with its fills
fn sync_aggregate(record: &mut SwapRecord, at: chrono::DateTime<Utc>) -> SwapResult<()> {
    let Some(order) = &record.partial else {
        return Ok(());
    };
    let target = order.aggregate_phase();
    let (btc, eth) = aggregate_leg_statuses(order);
    let legs = &mut record.legs;
    legs.bitcoin.status = btc;
    legs.ethereum.status = eth;

    match target.step() {
        Some(goal) => {
            while let (Some(current), Some(next)) = (legs.phase.step(), legs.phase.next()) {
                if current >= goal {
                    break;
                }
                legs.advance(next, None, at)?;
            }
        }
        None => {
            if legs.phase.can_transition(target) {
                legs.advance(target, None, at)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partial::{ChunkRange, FillStatus};
    use crate::sim::{SimulatedBitcoin, SimulatedEthereum};
    use crate::store::MemorySwapStore;
    use portal_core::OverallStatus;

    const USER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";
    const ETH_NOW: u64 = 1_700_000_000;

    struct Harness {
        btc: Arc<SimulatedBitcoin>,
        eth: Arc<SimulatedEthereum>,
        coordinator: Arc<SwapCoordinator>,
    }

    fn harness() -> Harness {
        let btc = Arc::new(SimulatedBitcoin::new(100_000_000, 1_000));
        let eth = Arc::new(SimulatedEthereum::new(100 * 10u128.pow(18), ETH_NOW));
        let store = Arc::new(MemorySwapStore::new());
        let coordinator = SwapCoordinator::new(
            btc.clone(),
            eth.clone(),
            store,
            CoordinatorSettings::default(),
        )
        .with_order_protocol(eth.clone());
        Harness {
            btc,
            eth,
            coordinator: Arc::new(coordinator),
        }
    }

    fn request(order_id: &str, mode: SwapMode) -> SwapRequest {
        SwapRequest {
            order_id: order_id.to_string(),
            // 0.001 BTC / 0.01 ETH
            bitcoin_amount: 100_000,
            ethereum_amount: 10_000_000_000_000_000,
            user_address: USER.to_string(),
            mode: Some(mode),
            resolvers: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_complete_swap() {
        let h = harness();
        let record = h
            .coordinator
            .execute(request("order-a", SwapMode::Simple))
            .await
            .unwrap();
        assert_eq!(record.phase(), SwapPhase::EthereumFunded);
        assert_eq!(record.overall_status, OverallStatus::Active);

        let record = h.coordinator.complete(&record.swap_id).await.unwrap();
        assert_eq!(record.phase(), SwapPhase::BothClaimed);
        assert_eq!(record.overall_status, OverallStatus::Completed);
        assert!(record.legs.bitcoin.claim_tx.is_some());
        assert!(record.legs.ethereum.claim_tx.is_some());
        assert!(record.completed_at.is_some());

        // Same hashlock on both chains, and it is sha256(preimage)
        let preimage = record.preimage.clone().unwrap();
        let btc_lock = h
            .btc
            .htlc_hashlock(record.legs.bitcoin.htlc_address.as_deref().unwrap())
            .await
            .unwrap();
        let eth_lock = h
            .eth
            .escrow_hashlock(record.legs.ethereum.escrow_address.as_deref().unwrap())
            .await
            .unwrap();
        assert_eq!(btc_lock, eth_lock);
        assert_eq!(btc_lock, preimage.hashlock());
        assert_eq!(record.preimage_hash, Some(btc_lock));

        let phases: Vec<SwapPhase> = record.legs.events.iter().map(|e| e.phase).collect();
        assert_eq!(phases, SwapPhase::SEQUENCE.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_refund_after_unconfirmed_funding() {
        let h = harness();
        // Funding never confirms, so setup stops before the escrow
        h.btc.set_auto_mine(false).await;

        let record = h
            .coordinator
            .execute(request("order-b", SwapMode::Simple))
            .await
            .unwrap();
        assert_eq!(record.phase(), SwapPhase::BitcoinHtlcCreated);
        assert!(record.legs.bitcoin.funding_txid.is_some());
        assert_eq!(record.legs.last_error.as_ref().unwrap().code, "timeout");
        assert!(record.legs.ethereum.escrow_address.is_none());

        // Too early
        let err = h.coordinator.refund(&record.swap_id).await.unwrap_err();
        assert!(matches!(err, SwapError::TimelockActive { chain: Chain::Bitcoin, .. }));

        h.btc.mine(145).await;
        let record = h.coordinator.refund(&record.swap_id).await.unwrap();
        assert_eq!(record.phase(), SwapPhase::TimeoutRefunded);
        assert_eq!(record.overall_status, OverallStatus::Refunded);
        assert!(record.legs.bitcoin.refund_tx.is_some());
        assert!(record.legs.ethereum.escrow_address.is_none());
        assert_eq!(h.eth.escrow_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refund_both_legs_after_timeouts() {
        let h = harness();
        let record = h
            .coordinator
            .execute(request("order-r", SwapMode::Simple))
            .await
            .unwrap();

        h.eth.advance_time(3_600).await;
        // Ethereum expired, Bitcoin not yet
        let err = h.coordinator.refund(&record.swap_id).await.unwrap_err();
        assert!(matches!(err, SwapError::TimelockActive { chain: Chain::Bitcoin, .. }));
        let mid = h.coordinator.get(&record.swap_id).await.unwrap();
        assert_eq!(mid.legs.ethereum.status, ChainStatus::Refunded);
        assert_eq!(mid.overall_status, OverallStatus::Refunded);
        assert_eq!(mid.phase(), SwapPhase::EthereumFunded);

        h.btc.mine(144).await;
        let done = h.coordinator.refund(&record.swap_id).await.unwrap();
        assert_eq!(done.phase(), SwapPhase::TimeoutRefunded);
        assert!(h.coordinator.refund(&record.swap_id).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_preimage_fails_loudly() {
        let h = harness();
        let mut record = h
            .coordinator
            .execute(request("order-n", SwapMode::Simple))
            .await
            .unwrap();

        // Corrupt the stored preimage
        record.preimage = Some(Secret::from_bytes([9u8; 32]));
        h.coordinator.store().put(&record).await.unwrap();

        let err = h.coordinator.complete(&record.swap_id).await.unwrap_err();
        assert_eq!(err.error_code(), "preimage_mismatch");

        let escrow = record.legs.ethereum.escrow_address.as_deref().unwrap();
        let status = h.eth.escrow_status(escrow).await.unwrap();
        assert!(!status.claimed);
        assert!(status.active);

        let failed = h.coordinator.get(&record.swap_id).await.unwrap();
        assert_eq!(failed.phase(), SwapPhase::Error);
        assert_eq!(failed.overall_status, OverallStatus::Error);
        assert_eq!(failed.legs.last_error.unwrap().code, "preimage_mismatch");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried() {
        let h = harness();
        h.eth.fail_next_call().await;
        let record = h
            .coordinator
            .execute(request("order-t", SwapMode::Simple))
            .await
            .unwrap();
        assert_eq!(record.phase(), SwapPhase::EthereumFunded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reused_order_id_rejected_before_funds_move() {
        let h = harness();
        h.coordinator
            .execute(request("order-dup", SwapMode::Simple))
            .await
            .unwrap();
        let balance = h.btc.wallet_balance().await;
        let escrows = h.eth.escrow_count().await;

        let err = h
            .coordinator
            .execute(request("order-dup", SwapMode::Simple))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "validation_error");
        assert_eq!(h.btc.wallet_balance().await, balance);
        assert_eq!(h.eth.escrow_count().await, escrows);
        assert_eq!(h.coordinator.store().list().await.unwrap().records.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_escrow_rejected_before_funds_move() {
        let h = harness();
        // Escrow for this order hash was created outside the coordinator
        let hashlock = Secret::from_bytes([3u8; 32]).hashlock();
        h.eth
            .create_escrow(&EscrowParams {
                order_hash: Hash32::keccak256(b"order-ext"),
                maker: h.eth.signer().to_string(),
                receiver: USER.to_string(),
                hashlock,
                timeout: ETH_NOW + 3_600,
            })
            .await
            .unwrap();
        let balance = h.btc.wallet_balance().await;

        let err = h
            .coordinator
            .execute(request("order-ext", SwapMode::Simple))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "duplicate_escrow");
        assert_eq!(h.btc.wallet_balance().await, balance);
        assert!(h.coordinator.store().list().await.unwrap().records.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_locks_are_per_swap() {
        let h = harness();
        let a = h
            .coordinator
            .execute(request("order-la", SwapMode::Simple))
            .await
            .unwrap();
        let b = h
            .coordinator
            .execute(request("order-lb", SwapMode::Simple))
            .await
            .unwrap();

        let lock_a = h
            .coordinator
            .record_locks
            .lock()
            .await
            .entry(a.swap_id.clone())
            .or_default()
            .clone();
        let held = lock_a.lock().await;

        let other = tokio::time::timeout(Duration::from_secs(1), h.coordinator.abandon(&b.swap_id)).await;
        assert!(other.unwrap().unwrap().abandoned);
        let same = tokio::time::timeout(Duration::from_secs(1), h.coordinator.abandon(&a.swap_id)).await;
        assert!(same.is_err());
        drop(held);

        // Finished swaps give their lock back
        let c = h
            .coordinator
            .execute(request("order-lc", SwapMode::Simple))
            .await
            .unwrap();
        h.coordinator.complete(&c.swap_id).await.unwrap();
        assert!(!h.coordinator.record_locks.lock().await.contains_key(&c.swap_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_insufficient_funds_moves_to_error() {
        let h = harness();
        let mut req = request("order-f", SwapMode::Simple);
        req.bitcoin_amount = 200_000_000;
        let err = h.coordinator.execute(req).await.unwrap_err();
        assert_eq!(err.error_code(), "insufficient_funds");
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_rejected_before_funding_and_after_end() {
        let h = harness();
        h.btc.set_auto_mine(false).await;
        let record = h
            .coordinator
            .execute(request("order-c", SwapMode::Simple))
            .await
            .unwrap();
        let err = h.coordinator.complete(&record.swap_id).await.unwrap_err();
        assert!(matches!(
            err,
            SwapError::InvalidTransition {
                from: SwapPhase::BitcoinHtlcCreated,
                to: SwapPhase::PreimageRevealed
            }
        ));

        let h = harness();
        let record = h
            .coordinator
            .execute(request("order-d", SwapMode::Simple))
            .await
            .unwrap();
        h.coordinator.complete(&record.swap_id).await.unwrap();
        let err = h.coordinator.complete(&record.swap_id).await.unwrap_err();
        assert!(matches!(err, SwapError::Terminal { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_stops_driving_but_allows_refund() {
        let h = harness();
        let record = h
            .coordinator
            .execute(request("order-x", SwapMode::Simple))
            .await
            .unwrap();

        let record = h.coordinator.abandon(&record.swap_id).await.unwrap();
        assert!(record.abandoned);
        let err = h.coordinator.complete(&record.swap_id).await.unwrap_err();
        assert!(matches!(err, SwapError::Abandoned(_)));

        h.eth.advance_time(3_600).await;
        h.btc.mine(144).await;
        let refunded = h.coordinator.refund(&record.swap_id).await.unwrap();
        assert_eq!(refunded.phase(), SwapPhase::TimeoutRefunded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_cancels_confirmation_wait() {
        let h = harness();
        h.btc.set_auto_mine(false).await;

        let coordinator = h.coordinator.clone();
        let task = tokio::spawn(async move {
            coordinator
                .execute(request("order-w", SwapMode::Simple))
                .await
        });

        // Let setup reach the confirmation wait
        tokio::time::sleep(Duration::from_secs(20)).await;
        let listing = h.coordinator.store().list().await.unwrap();
        let swap_id = listing.records[0].swap_id.clone();
        h.coordinator.abandon(&swap_id).await.unwrap();

        let record = task.await.unwrap().unwrap();
        assert!(record.abandoned);
        assert_eq!(record.phase(), SwapPhase::BitcoinHtlcCreated);
        assert!(record.legs.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limit_order_mode_registers_first() {
        let h = harness();
        let record = h
            .coordinator
            .execute(request("order-l", SwapMode::LimitOrder))
            .await
            .unwrap();
        assert!(record.legs.ethereum.lop_txid.is_some());
        assert_eq!(
            record.legs.ethereum.order_hash,
            Some(Hash32::keccak256(b"order-l"))
        );
        assert_eq!(record.phase(), SwapPhase::EthereumFunded);
    }

    #[tokio::test(start_paused = true)]
    async fn test_request_validation() {
        let h = harness();

        let mut req = request("bad/id", SwapMode::Simple);
        assert!(h.coordinator.execute(req.clone()).await.is_err());

        req.order_id = "ok".into();
        req.user_address = "not-an-address".into();
        assert_eq!(
            h.coordinator.execute(req.clone()).await.unwrap_err().error_code(),
            "validation_error"
        );

        req.user_address = USER.into();
        req.ethereum_amount = 0;
        assert!(h.coordinator.execute(req).await.is_err());
    }

    #[tokio::test]
    async fn test_timelock_ordering_enforced() {
        let btc = Arc::new(SimulatedBitcoin::new(100_000_000, 1_000));
        let eth = Arc::new(SimulatedEthereum::new(10u128.pow(18), ETH_NOW));
        let mut settings = CoordinatorSettings::default();
        settings.timeouts.bitcoin_timeout_blocks = 6;
        settings.timeouts.ethereum_timeout_secs = 3_600;
        let coordinator = SwapCoordinator::new(btc, eth, Arc::new(MemorySwapStore::new()), settings);

        let err = coordinator
            .execute(request("order-o", SwapMode::Simple))
            .await
            .unwrap_err();
        assert!(matches!(err, SwapError::TimelockOrdering { bitcoin_secs: 3_600, ethereum_secs: 3_600 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_generated_timeouts_ordered() {
        let h = harness();
        let record = h
            .coordinator
            .execute(request("order-z", SwapMode::Simple))
            .await
            .unwrap();

        let settings = h.coordinator.settings();
        let btc_blocks = record.legs.bitcoin.timeout_height.unwrap() - 101;
        let btc_secs = btc_blocks * settings.timeouts.bitcoin_block_secs;
        let eth_secs = record.legs.ethereum.timeout.unwrap() - ETH_NOW;
        assert_eq!(btc_blocks, 144);
        assert!(btc_secs > eth_secs);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_partial_fill() {
        let h = harness();
        let record = h
            .coordinator
            .execute(request("order-p", SwapMode::Partial))
            .await
            .unwrap();
        let order = record.partial.as_ref().unwrap();
        assert_eq!(order.fills.len(), 4);
        assert_eq!(record.phase(), SwapPhase::EthereumFunded);

        // Disjoint ranges covering all 100 chunks
        let mut seen = std::collections::HashSet::new();
        for fill in &order.fills {
            for i in fill.range.lo..=fill.range.hi {
                assert!(seen.insert(i), "chunk {} twice", i);
            }
        }
        assert_eq!(seen.len(), 100);

        // Each fill is locked with its own secret
        let locks: std::collections::HashSet<Hash32> = order.fills.iter().map(|f| f.hashlock).collect();
        assert_eq!(locks.len(), 4);
        assert_eq!(
            order.fills.iter().map(|f| f.bitcoin_amount).sum::<u64>(),
            100_000
        );

        let record = h.coordinator.complete(&record.swap_id).await.unwrap();
        let order = record.partial.as_ref().unwrap();
        assert!(order.fills.iter().all(FillRecord::is_filled));
        assert_eq!(order.overall_filled(), 100);
        assert_eq!(order.fill_status(), FillStatus::Filled);
        assert_eq!(record.overall_status, OverallStatus::Completed);
        assert_eq!(record.phase(), SwapPhase::BothClaimed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_fill_short_of_full_is_valid() {
        let h = harness();
        let mut req = request("order-q", SwapMode::Partial);
        req.resolvers = Some(vec![
            ResolverAssignment::new("Resolver A", USER, 0, 19).unwrap(),
            ResolverAssignment::new("Resolver B", USER, 20, 44).unwrap(),
        ]);
        let record = h.coordinator.execute(req).await.unwrap();
        let record = h.coordinator.complete(&record.swap_id).await.unwrap();

        let order = record.partial.as_ref().unwrap();
        assert_eq!(order.overall_filled(), 45);
        assert_eq!(order.fill_status(), FillStatus::PartiallyFilled);
        assert_eq!(record.overall_status, OverallStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_overlap_rejected_before_chain_work() {
        let h = harness();
        let mut req = request("order-v", SwapMode::Partial);
        req.resolvers = Some(vec![
            ResolverAssignment::new("Resolver A", USER, 0, 30).unwrap(),
            ResolverAssignment::new("Resolver B", USER, 25, 50).unwrap(),
        ]);
        let err = h.coordinator.execute(req).await.unwrap_err();
        assert!(matches!(err, SwapError::RangeConflict { lo: 25, hi: 50, .. }));
        assert_eq!(h.eth.escrow_count().await, 0);
    }

    #[test]
    fn test_full_range_uses_full_fill_secret() {
        let range = ChunkRange::new(0, 99).unwrap();
        assert_eq!(range.secret_index(), crate::secrets::FULL_FILL_INDEX);
    }
}
