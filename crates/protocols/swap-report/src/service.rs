//! Swap report service
//!
//! Reads persisted records, merges them with live chain state and writes
//! report documents. Never mutates a swap's phase.

use std::sync::Arc;

use atomic_swap::{validate_order_id, SwapError, SwapPhase, SwapRecord, SwapResult, SwapStore};
use chrono::Utc;
use futures::future::join_all;
use portal_core::{BitcoinHtlc, ChainStatus, EthereumEscrow, OverallStatus, SwapId};

use crate::fetch;
use crate::report::{self, ExportFormat};
use crate::state::{
    public_record, BitcoinView, EthereumView, FillDetails, ReportSummary, SwapDetails, SwapReport,
    TrackSwap,
};

pub struct SwapReportService {
    bitcoin: Arc<dyn BitcoinHtlc>,
    ethereum: Arc<dyn EthereumEscrow>,
    store: Arc<dyn SwapStore>,
    block_secs: u64,
}

impl SwapReportService {
    pub fn new(
        bitcoin: Arc<dyn BitcoinHtlc>,
        ethereum: Arc<dyn EthereumEscrow>,
        store: Arc<dyn SwapStore>,
        block_secs: u64,
    ) -> Self {
        Self {
            bitcoin,
            ethereum,
            store,
            block_secs,
        }
    }

    /// Persist a swap created outside the coordinator under a fresh id
    pub async fn track_swap(&self, data: TrackSwap) -> SwapResult<SwapRecord> {
        validate_order_id(&data.order_id)?;
        let now = Utc::now();
        let swap_id = SwapId::generate(now.timestamp_millis(), &data.order_id);
        let mut record = SwapRecord::new(
            swap_id,
            &data.order_id,
            data.mode,
            &data.user_address,
            data.bitcoin_amount,
            data.ethereum_amount,
            now,
        );
        record.preimage_hash = data.preimage_hash;

        let legs = &mut record.legs;
        legs.bitcoin.hashlock = data.preimage_hash;
        legs.ethereum.hashlock = data.preimage_hash;
        let mut reached = Vec::new();
        if let Some(address) = data.htlc_address {
            legs.bitcoin.htlc_address = Some(address);
            legs.bitcoin.status = ChainStatus::Created;
            reached.push((SwapPhase::BitcoinHtlcCreated, None));
        }
        if let Some(txid) = data.bitcoin_funding_txid {
            legs.bitcoin.funding_txid = Some(txid.clone());
            legs.bitcoin.status = ChainStatus::Funded;
            reached.push((SwapPhase::BitcoinFunded, Some(txid)));
        }
        if let Some(address) = data.escrow_address {
            legs.ethereum.escrow_address = Some(address);
            legs.ethereum.status = ChainStatus::Created;
            reached.push((SwapPhase::EthereumEscrowCreated, None));
        }
        if let Some(txid) = data.ethereum_funding_txid {
            legs.ethereum.funding_txid = Some(txid.clone());
            legs.ethereum.status = ChainStatus::Funded;
            reached.push((SwapPhase::EthereumFunded, Some(txid)));
        }
        // Phases only count while they follow on from each other
        for (phase, txid) in reached {
            if legs.advance(phase, txid, now).is_err() {
                break;
            }
        }

        record.refresh(now);
        self.store.put(&record).await?;
        tracing::info!(swap_id = %record.swap_id, order_id = %record.order_id, "Tracking swap");
        Ok(record)
    }

    /// Persisted record merged with a fresh query of both chains
    pub async fn get_swap_details(&self, swap_id: &SwapId) -> SwapResult<SwapDetails> {
        let record = self
            .store
            .get(swap_id)
            .await?
            .ok_or_else(|| SwapError::NotFound(swap_id.to_string()))?;

        let btc = self.bitcoin.as_ref();
        let eth = self.ethereum.as_ref();
        let chain_time = match eth.timestamp().await {
            Ok(t) => t,
            Err(e) => {
                tracing::warn!(error = %e, "Ethereum time unavailable, using wall clock");
                Utc::now().timestamp().max(0) as u64
            }
        };

        let (current_status, fills, overall_status) = match &record.partial {
            None => {
                let current = fetch::observe_pair(btc, eth, &record.legs).await;
                let overall = current.overall();
                (current, Vec::new(), overall)
            }
            Some(order) => {
                let views = join_all(order.fills.iter().map(|fill| async move {
                    let current = fetch::observe_pair(btc, eth, &fill.legs).await;
                    let revealed = fill
                        .legs
                        .ethereum
                        .claim_tx
                        .as_ref()
                        .and_then(|_| order.secret(fill.secret_index).ok())
                        .map(|s| s.to_hex());
                    FillDetails {
                        resolver: fill.resolver.clone(),
                        range: fill.range.to_string(),
                        percent: fill.range.percent(),
                        status: current.overall(),
                        current_status: current,
                        revealed_secret: revealed,
                    }
                }))
                .await;
                let overall = atomic_swap::partial::aggregate_statuses(views.iter().map(|f| f.status));
                let (btc_status, eth_status) = atomic_swap::partial::aggregate_leg_statuses(order);
                let mut current = crate::state::CurrentStatus::default();
                current.bitcoin.status = btc_status;
                current.ethereum.status = eth_status;
                (current, views, overall)
            }
        };

        if overall_status != record.overall_status {
            tracing::debug!(
                swap_id = %swap_id,
                recorded = %record.overall_status,
                observed = %overall_status,
                "Chains and record disagree"
            );
        }

        Ok(SwapDetails {
            swap: public_record(&record),
            record,
            current_status,
            fills,
            overall_status,
            observed_at: Utc::now(),
            chain_time,
        })
    }

    /// Build a report and save it as `report_<millis>.json`
    pub async fn generate_report(&self, swap_id: &SwapId) -> SwapResult<SwapReport> {
        let details = self.get_swap_details(swap_id).await?;
        let report = report::build_report(&details, self.block_secs, Utc::now());

        let body = serde_json::to_value(&report)
            .map_err(|e| SwapError::validation(format!("report did not serialize: {}", e)))?;
        let location = self
            .store
            .save_report(&format!("{}.json", report.report_id), &body)
            .await?;
        tracing::info!(swap_id = %swap_id, report_id = %report.report_id, location = %location, "Report saved");
        Ok(report)
    }

    pub async fn export_report(&self, swap_id: &SwapId, format: &str) -> SwapResult<(ExportFormat, String)> {
        let format: ExportFormat = format.parse()?;
        let report = self.generate_report(swap_id).await?;
        Ok((format, report::export(&report, format)?))
    }

    /// Every readable record, newest first. Unreadable ones are logged and skipped.
    pub async fn list_swaps(&self) -> SwapResult<Vec<SwapRecord>> {
        let listing = self.store.list().await?;
        for skipped in &listing.skipped {
            tracing::warn!(error = %skipped, "Skipping unreadable swap record");
        }
        let mut records = listing.records;
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }

    pub async fn summary(&self) -> SwapResult<ReportSummary> {
        let records = self.list_swaps().await?;
        Ok(report::summarize(&records))
    }

    pub async fn bitcoin_htlc_status(&self, address: &str) -> BitcoinView {
        fetch::bitcoin_htlc_status(self.bitcoin.as_ref(), address).await
    }

    pub async fn ethereum_escrow_status(&self, address: &str) -> EthereumView {
        fetch::ethereum_escrow_status(self.ethereum.as_ref(), address).await
    }

    /// Overall status as the chains see it, for callers that need nothing else
    pub async fn observed_status(&self, swap_id: &SwapId) -> SwapResult<OverallStatus> {
        Ok(self.get_swap_details(swap_id).await?.overall_status)
    }
}
