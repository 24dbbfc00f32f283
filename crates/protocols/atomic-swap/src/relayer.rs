//! Bitcoin-to-Ethereum relayer
//!
//! Watches funded HTLCs and creates the matching Ethereum escrow once the
//! funding transaction has enough confirmations. Each watch runs in its own
//! task; every task stops on confirmation, on its monitoring deadline, or
//! on the shared shutdown signal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portal_core::{
    BitcoinHtlc, ChainError, ConfirmationSource, EscrowParams, EthereumEscrow, Hash32,
    RelayerConfig, TxId, UnixSecs,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};

use crate::coordinator::is_eth_address;
use crate::error::{SwapError, SwapResult};
use crate::retry::with_retry;

// ─── Types ──────────────────────────────────────────────────────────────────

/// Everything needed to create the escrow once Bitcoin is confirmed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub order_id: String,
    pub order_hash: Hash32,
    pub htlc_address: String,
    pub maker: String,
    pub receiver: String,
    pub hashlock: Hash32,
    pub timeout: UnixSecs,
    pub bitcoin_txid: TxId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayStatus {
    AwaitingBitcoinFunding,
    CreatingEthereumEscrow,
    AwaitingEthereumFunding,
    Failed,
    Timeout,
    Stopped,
}

impl RelayStatus {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::AwaitingBitcoinFunding | Self::CreatingEthereumEscrow)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchInfo {
    pub id: String,
    pub order_id: String,
    pub status: RelayStatus,
    pub htlc_address: String,
    pub bitcoin_txid: TxId,
    pub escrow_address: Option<String>,
    pub confirmations: u32,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct WatchEntry {
    request: WatchRequest,
    info: WatchInfo,
}

// ─── Shared state ───────────────────────────────────────────────────────────

struct Shared {
    bitcoin: Arc<dyn BitcoinHtlc>,
    ethereum: Arc<dyn EthereumEscrow>,
    config: RelayerConfig,
    entries: RwLock<HashMap<String, WatchEntry>>,
}

impl Shared {
    async fn update<F>(&self, order_id: &str, f: F)
    where
        F: FnOnce(&mut WatchInfo),
    {
        if let Some(entry) = self.entries.write().await.get_mut(order_id) {
            f(&mut entry.info);
            entry.info.updated_at = Utc::now();
        }
    }

    /// Drop finished watches older than the retention window
    async fn prune(&self) {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.retention_secs as i64);
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.info.status.is_active() || e.info.updated_at > cutoff);
        let evicted = before - entries.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Pruned finished watches");
        }
    }

    /// Claim the right to create the escrow. Only one caller ever wins.
    async fn try_begin_relay(&self, order_id: &str) -> Option<WatchRequest> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(order_id)?;
        if entry.info.status != RelayStatus::AwaitingBitcoinFunding {
            return None;
        }
        entry.info.status = RelayStatus::CreatingEthereumEscrow;
        entry.info.updated_at = Utc::now();
        Some(entry.request.clone())
    }

    async fn relay(&self, request: WatchRequest) {
        let params = EscrowParams {
            order_hash: request.order_hash,
            maker: request.maker.clone(),
            receiver: request.receiver.clone(),
            hashlock: request.hashlock,
            timeout: request.timeout,
        };
        let eth = self.ethereum.as_ref();
        let params_ref = &params;

        match with_retry("create_escrow", move || eth.create_escrow(params_ref)).await {
            Ok(handle) => {
                tracing::info!(
                    order_id = %request.order_id,
                    escrow = %handle.address,
                    txid = %handle.tx,
                    "Relayed Bitcoin funding to Ethereum escrow"
                );
                self.update(&request.order_id, |info| {
                    info.status = RelayStatus::AwaitingEthereumFunding;
                    info.escrow_address = Some(handle.address.clone());
                })
                .await;
            }
            Err(e) => {
                tracing::error!(order_id = %request.order_id, error = %e, "Escrow creation failed");
                self.update(&request.order_id, |info| {
                    info.status = RelayStatus::Failed;
                    info.error = Some(e.to_string());
                })
                .await;
            }
        }
    }

    /// One poll. Returns false once the watch has nothing left to do.
    async fn poll_once(&self, order_id: &str) -> bool {
        let txid = {
            let entries = self.entries.read().await;
            match entries.get(order_id) {
                Some(e) if e.info.status == RelayStatus::AwaitingBitcoinFunding => {
                    e.request.bitcoin_txid.clone()
                }
                _ => return false,
            }
        };

        match self.bitcoin.confirmations(&txid).await {
            Ok(confs) => {
                self.update(order_id, |info| info.confirmations = confs).await;
                if confs < self.config.required_confirmations {
                    tracing::trace!(order_id, confs, "Waiting for Bitcoin confirmations");
                    return true;
                }
                if let Some(request) = self.try_begin_relay(order_id).await {
                    self.relay(request).await;
                }
                false
            }
            Err(ChainError::NotFound { .. }) => {
                tracing::trace!(order_id, txid = %txid, "Funding transaction not yet visible");
                true
            }
            Err(e) => {
                tracing::warn!(order_id, error = %e, "Confirmation poll failed");
                true
            }
        }
    }
}

async fn watch_loop(shared: Arc<Shared>, order_id: String, mut shutdown: watch::Receiver<bool>) {
    let deadline = Instant::now() + Duration::from_secs(shared.config.max_monitor_secs);
    let mut ticker = interval(Duration::from_secs(shared.config.poll_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = sleep_until(deadline) => {
                shared.update(&order_id, |info| {
                    if info.status.is_active() {
                        info.status = RelayStatus::Timeout;
                    }
                }).await;
                tracing::warn!(order_id = %order_id, "Monitoring window elapsed");
                break;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    shared.update(&order_id, |info| {
                        if info.status == RelayStatus::AwaitingBitcoinFunding {
                            info.status = RelayStatus::Stopped;
                        }
                    }).await;
                    break;
                }
            }
            _ = ticker.tick() => {
                if !shared.poll_once(&order_id).await {
                    break;
                }
            }
        }
    }
    tracing::debug!(order_id = %order_id, "Watch task stopped");
}

// ─── Relayer ────────────────────────────────────────────────────────────────

pub struct Relayer {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Relayer {
    pub fn new(
        bitcoin: Arc<dyn BitcoinHtlc>,
        ethereum: Arc<dyn EthereumEscrow>,
        config: RelayerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                bitcoin,
                ethereum,
                config,
                entries: RwLock::new(HashMap::new()),
            }),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Register a watch and start its polling task
    pub async fn monitor(&self, request: WatchRequest) -> SwapResult<WatchInfo> {
        if request.order_id.is_empty() {
            return Err(SwapError::validation("orderId is required"));
        }
        for (field, value) in [("maker", &request.maker), ("receiver", &request.receiver)] {
            if !is_eth_address(value) {
                return Err(SwapError::validation(format!(
                    "{} '{}' is not an Ethereum address",
                    field, value
                )));
            }
        }
        if *self.shutdown.borrow() {
            return Err(SwapError::validation("relayer is shutting down"));
        }

        self.shared.prune().await;
        let now = Utc::now();
        let info = WatchInfo {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: request.order_id.clone(),
            status: RelayStatus::AwaitingBitcoinFunding,
            htlc_address: request.htlc_address.clone(),
            bitcoin_txid: request.bitcoin_txid.clone(),
            escrow_address: None,
            confirmations: 0,
            error: None,
            started_at: now,
            updated_at: now,
        };

        {
            let mut entries = self.shared.entries.write().await;
            if entries
                .get(&request.order_id)
                .is_some_and(|e| e.info.status.is_active())
            {
                return Err(SwapError::validation(format!(
                    "order {} is already monitored",
                    request.order_id
                )));
            }
            entries.insert(
                request.order_id.clone(),
                WatchEntry {
                    request: request.clone(),
                    info: info.clone(),
                },
            );
        }

        let handle = tokio::spawn(watch_loop(
            self.shared.clone(),
            request.order_id.clone(),
            self.shutdown.subscribe(),
        ));
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(handle);

        tracing::info!(
            order_id = %request.order_id,
            htlc = %request.htlc_address,
            txid = %request.bitcoin_txid,
            "Monitoring Bitcoin funding"
        );
        Ok(info)
    }

    /// Demo shortcut: relay now without waiting for confirmations
    pub async fn simulate_bitcoin_funding(&self, order_id: &str) -> SwapResult<WatchInfo> {
        let request = match self.shared.try_begin_relay(order_id).await {
            Some(request) => request,
            None => {
                return match self.status(order_id).await {
                    None => Err(SwapError::NotFound(format!("watch for order {}", order_id))),
                    Some(info) => Err(SwapError::validation(format!(
                        "order {} is {:?}, not awaiting Bitcoin funding",
                        order_id, info.status
                    ))),
                }
            }
        };
        tracing::info!(order_id, "Simulating Bitcoin funding");
        self.shared.relay(request).await;
        self.status(order_id)
            .await
            .ok_or_else(|| SwapError::NotFound(format!("watch for order {}", order_id)))
    }

    pub async fn status(&self, order_id: &str) -> Option<WatchInfo> {
        self.shared
            .entries
            .read()
            .await
            .get(order_id)
            .map(|e| e.info.clone())
    }

    pub async fn list_active(&self) -> Vec<WatchInfo> {
        let mut active: Vec<WatchInfo> = self
            .shared
            .entries
            .read()
            .await
            .values()
            .filter(|e| e.info.status.is_active())
            .map(|e| e.info.clone())
            .collect();
        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Signal every watch task and wait for them to exit
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        let count = tasks.len();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Watch task ended abnormally");
            }
        }
        tracing::info!(tasks = count, "Relayer stopped");
    }
}
