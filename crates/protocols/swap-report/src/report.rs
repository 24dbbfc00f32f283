//! Report assembly: timeline, recommendations, export and summary

use std::str::FromStr;

use atomic_swap::{SwapError, SwapPhase, SwapRecord, SwapResult};
use chrono::{DateTime, Utc};
use portal_core::{format_btc, format_eth, ChainStatus, OverallStatus, Sats, UnixSecs, Wei};

use crate::state::{
    BitcoinSection, CurrentStatus, EthereumSection, FillSummary, PartialSection, Priority,
    Recommendation, ReportSummary, ReportSwap, SwapDetails, SwapReport, TimelineEntry,
};

/// Ethereum escrows closer than this to their timeout are flagged
pub const ETHEREUM_WARNING_SECS: u64 = 3_600;

/// Bitcoin HTLCs closer than this (by block estimate) are flagged
pub const BITCOIN_WARNING_SECS: u64 = 7_200;

// ─── Timeline ───────────────────────────────────────────────────────────────

fn event_name(phase: SwapPhase) -> String {
    match phase {
        SwapPhase::Initiated => "SWAP_INITIATED".to_string(),
        other => other.as_str().to_string(),
    }
}

fn pair_timeline(
    out: &mut Vec<TimelineEntry>,
    legs: &atomic_swap::LegPair,
    current: &CurrentStatus,
    label: Option<&str>,
) {
    for event in &legs.events {
        out.push(TimelineEntry {
            timestamp: Some(event.at),
            event: event_name(event.phase),
            txid: event.txid.clone(),
            description: label.map(str::to_string),
        });
    }

    // Spends seen on chain that the record has not caught up with
    let recorded = |phase: SwapPhase| legs.events.iter().any(|e| e.phase == phase);
    if current.bitcoin.status == ChainStatus::Claimed && !recorded(SwapPhase::BothClaimed) {
        out.push(TimelineEntry {
            timestamp: None,
            event: "BITCOIN_HTLC_CLAIMED".to_string(),
            txid: current.bitcoin.claim_tx.clone(),
            description: label.map(str::to_string),
        });
    }
    if current.ethereum.status == ChainStatus::Claimed && !recorded(SwapPhase::PreimageRevealed) {
        out.push(TimelineEntry {
            timestamp: None,
            event: "ETHEREUM_ESCROW_CLAIMED".to_string(),
            txid: None,
            description: label.map(str::to_string),
        });
    }
}

/// Recorded phase events plus chain-observed spends, oldest first.
/// Entries without a timestamp sort last.
pub fn timeline(details: &SwapDetails) -> Vec<TimelineEntry> {
    let mut out = Vec::new();
    let record = &details.record;
    match &record.partial {
        None => pair_timeline(&mut out, &record.legs, &details.current_status, None),
        Some(order) => {
            out.push(TimelineEntry {
                timestamp: Some(record.created_at),
                event: "SWAP_INITIATED".to_string(),
                txid: None,
                description: Some(format!("{} fills", order.fills.len())),
            });
            for (fill, live) in order.fills.iter().zip(&details.fills) {
                let mut entries = Vec::new();
                pair_timeline(&mut entries, &fill.legs, &live.current_status, Some(&fill.resolver));
                // Each fill repeats INITIATED; the order-level entry covers it
                out.extend(entries.into_iter().filter(|e| e.event != "SWAP_INITIATED"));
            }
        }
    }
    out.sort_by_key(|e| (e.timestamp.is_none(), e.timestamp));
    out
}

// ─── Recommendations ────────────────────────────────────────────────────────

fn pair_recommendations(
    out: &mut Vec<Recommendation>,
    current: &CurrentStatus,
    now: UnixSecs,
    block_secs: u64,
    label: Option<&str>,
) {
    let suffix = label.map(|l| format!(" ({})", l)).unwrap_or_default();
    let btc_remaining = match (current.bitcoin.timeout_height, current.bitcoin.current_height) {
        (Some(timeout), Some(height)) => Some(timeout.saturating_sub(height).saturating_mul(block_secs)),
        _ => None,
    };

    // Secret is public once the escrow is claimed; the HTLC must be spent before it times out
    if current.ethereum.status == ChainStatus::Claimed && current.bitcoin.status == ChainStatus::Funded {
        if btc_remaining.is_some_and(|secs| secs < BITCOIN_WARNING_SECS) {
            out.push(Recommendation {
                priority: Priority::High,
                action: "Claim Bitcoin HTLC now".to_string(),
                reason: format!("Secret revealed but Bitcoin HTLC unclaimed near timeout{}", suffix),
            });
        }
        return;
    }

    if current.overall() != OverallStatus::Active {
        return;
    }

    if let Some(timeout) = current.ethereum.timeout {
        if timeout.saturating_sub(now) < ETHEREUM_WARNING_SECS {
            out.push(Recommendation {
                priority: Priority::High,
                action: "Complete swap immediately".to_string(),
                reason: format!("Ethereum escrow timeout approaching{}", suffix),
            });
        }
    }

    if let Some(remaining) = btc_remaining {
        if remaining < BITCOIN_WARNING_SECS {
            out.push(Recommendation {
                priority: Priority::High,
                action: "Complete or refund swap".to_string(),
                reason: format!("Bitcoin HTLC timeout approaching{}", suffix),
            });
        }
    }
}

/// Advisory only; nothing here acts on the swap
pub fn recommendations(details: &SwapDetails, block_secs: u64) -> Vec<Recommendation> {
    let mut out = Vec::new();
    let now = details.chain_time;

    if details.fills.is_empty() {
        pair_recommendations(&mut out, &details.current_status, now, block_secs, None);
    } else {
        for fill in &details.fills {
            pair_recommendations(&mut out, &fill.current_status, now, block_secs, Some(&fill.resolver));
        }
    }

    if details.overall_status == OverallStatus::Error {
        out.push(Recommendation {
            priority: Priority::Critical,
            action: "Investigate error and contact support".to_string(),
            reason: match &details.record.legs.last_error {
                Some(e) => format!("Swap encountered an error: {}", e.details),
                None => "Swap encountered an error".to_string(),
            },
        });
    }
    out
}

// ─── Report ─────────────────────────────────────────────────────────────────

pub fn build_report(details: &SwapDetails, block_secs: u64, at: DateTime<Utc>) -> SwapReport {
    let record = &details.record;
    let legs = &record.legs;

    let partial = record.partial.as_ref().map(|order| PartialSection {
        merkle_root: order.merkle_root,
        overall_filled: order.overall_filled(),
        fill_status: order.fill_status(),
        fills: order
            .fills
            .iter()
            .zip(&details.fills)
            .map(|(fill, live)| FillSummary {
                resolver: fill.resolver.clone(),
                range: fill.range.to_string(),
                percent: fill.range.percent(),
                status: live.status,
                bitcoin_amount: format_btc(fill.bitcoin_amount),
                ethereum_amount: format_eth(fill.ethereum_amount),
            })
            .collect(),
    });

    SwapReport {
        report_id: format!("report_{}", at.timestamp_millis()),
        generated_at: at,
        swap: ReportSwap {
            id: record.swap_id.to_string(),
            order_id: record.order_id.clone(),
            mode: record.mode,
            created_at: record.created_at,
            preimage_hash: record.preimage_hash,
            phase: record.phase().to_string(),
            status: details.overall_status,
        },
        bitcoin: BitcoinSection {
            htlc_address: legs.bitcoin.htlc_address.clone(),
            funding_txid: legs.bitcoin.funding_txid.clone(),
            amount: format_btc(record.bitcoin_amount),
            live: details.current_status.bitcoin.clone(),
        },
        ethereum: EthereumSection {
            escrow_address: legs.ethereum.escrow_address.clone(),
            funding_txid: legs.ethereum.funding_txid.clone(),
            amount: format_eth(record.ethereum_amount),
            live: details.current_status.ethereum.clone(),
        },
        partial,
        timeline: timeline(details),
        recommendations: recommendations(details, block_secs),
    }
}

// ─── Export ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = SwapError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            other => Err(SwapError::validation(format!(
                "Unsupported export format: {}",
                other
            ))),
        }
    }
}

fn csv_cell(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

fn opt<T: ToString>(value: &Option<T>) -> String {
    value.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Two-column `Field,Value` sheet, every cell quoted
pub fn report_to_csv(report: &SwapReport) -> String {
    let mut rows: Vec<(String, String)> = vec![
        ("Field".into(), "Value".into()),
        ("Report ID".into(), report.report_id.clone()),
        ("Generated At".into(), report.generated_at.to_rfc3339()),
        ("Swap ID".into(), report.swap.id.clone()),
        ("Order ID".into(), report.swap.order_id.clone()),
        ("Mode".into(), report.swap.mode.to_string()),
        ("Status".into(), report.swap.status.to_string()),
        ("Phase".into(), report.swap.phase.clone()),
        ("Preimage Hash".into(), opt(&report.swap.preimage_hash)),
        (String::new(), String::new()),
        ("Bitcoin HTLC Address".into(), opt(&report.bitcoin.htlc_address)),
        ("Bitcoin Amount".into(), report.bitcoin.amount.clone()),
        ("Bitcoin Status".into(), report.bitcoin.live.status.to_string()),
        ("Bitcoin Balance".into(), opt(&report.bitcoin.live.balance)),
        ("Bitcoin Funding TX".into(), opt(&report.bitcoin.funding_txid)),
        (String::new(), String::new()),
        ("Ethereum Escrow Address".into(), opt(&report.ethereum.escrow_address)),
        ("Ethereum Amount".into(), report.ethereum.amount.clone()),
        ("Ethereum Status".into(), report.ethereum.live.status.to_string()),
        ("Ethereum Active".into(), opt(&report.ethereum.live.active)),
        ("Ethereum Funding TX".into(), opt(&report.ethereum.funding_txid)),
    ];

    if let Some(partial) = &report.partial {
        rows.push((String::new(), String::new()));
        rows.push(("Overall Filled".into(), format!("{}%", partial.overall_filled)));
        for fill in &partial.fills {
            rows.push((
                format!("Fill {}", fill.resolver),
                format!("{} {}", fill.range, fill.status),
            ));
        }
    }

    rows.iter()
        .map(|(field, value)| format!("{},{}", csv_cell(field), csv_cell(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn export(report: &SwapReport, format: ExportFormat) -> SwapResult<String> {
    match format {
        ExportFormat::Csv => Ok(report_to_csv(report)),
        ExportFormat::Json => serde_json::to_string_pretty(report)
            .map_err(|e| SwapError::validation(format!("report did not serialize: {}", e))),
    }
}

// ─── Summary ────────────────────────────────────────────────────────────────

pub fn summarize(records: &[SwapRecord]) -> ReportSummary {
    let mut summary = ReportSummary {
        total_swaps: records.len(),
        ..Default::default()
    };
    let mut btc_volume: Sats = 0;
    let mut eth_volume: Wei = 0;
    let mut durations = Vec::new();

    for record in records {
        match record.overall_status {
            OverallStatus::Completed => {
                summary.completed_swaps += 1;
                btc_volume = btc_volume.saturating_add(record.bitcoin_amount);
                eth_volume = eth_volume.saturating_add(record.ethereum_amount);
                if let Some(done) = record.completed_at {
                    durations.push((done - record.created_at).num_seconds());
                }
            }
            OverallStatus::Active => summary.active_swaps += 1,
            OverallStatus::Pending => summary.pending_swaps += 1,
            OverallStatus::Error => summary.failed_swaps += 1,
            OverallStatus::Refunded => summary.refunded_swaps += 1,
        }
    }

    summary.total_bitcoin_volume = format_btc(btc_volume);
    summary.total_ethereum_volume = format_eth(eth_volume);
    if !durations.is_empty() {
        summary.average_completion_secs = Some(durations.iter().sum::<i64>() / durations.len() as i64);
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{public_record, BitcoinView, EthereumView};
    use chrono::Duration;
    use portal_core::{SwapId, SwapMode, TxId};

    const NOW: UnixSecs = 1_700_000_000;

    fn record(id: &str) -> SwapRecord {
        SwapRecord::new(
            SwapId::new(id),
            "order-1",
            SwapMode::Simple,
            "0x70997970C51812dc3A010C7d01b50e0d17dc79C8",
            100_000,
            10_000_000_000_000_000,
            Utc::now(),
        )
    }

    fn active(eth_timeout: UnixSecs, btc_blocks_left: u64) -> CurrentStatus {
        CurrentStatus {
            bitcoin: BitcoinView {
                status: ChainStatus::Funded,
                current_height: Some(200),
                timeout_height: Some(200 + btc_blocks_left),
                ..Default::default()
            },
            ethereum: EthereumView {
                status: ChainStatus::Funded,
                timeout: Some(eth_timeout),
                ..Default::default()
            },
        }
    }

    fn details(record: SwapRecord, current: CurrentStatus) -> SwapDetails {
        SwapDetails {
            swap: public_record(&record),
            overall_status: current.overall(),
            record,
            current_status: current,
            fills: Vec::new(),
            observed_at: Utc::now(),
            chain_time: NOW,
        }
    }

    #[test]
    fn test_no_recommendations_with_time_left() {
        let d = details(record("swap_1_a"), active(NOW + 7_200, 144));
        assert!(recommendations(&d, 600).is_empty());
    }

    #[test]
    fn test_ethereum_timeout_warning() {
        let d = details(record("swap_1_a"), active(NOW + 1_800, 144));
        let recs = recommendations(&d, 600);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].priority, Priority::High);
        assert!(recs[0].reason.contains("Ethereum"));
    }

    #[test]
    fn test_bitcoin_timeout_warning_uses_block_estimate() {
        // 11 blocks * 600s = 6600s < 2h
        let d = details(record("swap_1_a"), active(NOW + 7_200, 11));
        let recs = recommendations(&d, 600);
        assert_eq!(recs.len(), 1);
        assert!(recs[0].reason.contains("Bitcoin"));

        // 12 blocks = exactly 2h, not flagged
        let d = details(record("swap_1_a"), active(NOW + 7_200, 12));
        assert!(recommendations(&d, 600).is_empty());
    }

    #[test]
    fn test_error_is_critical() {
        let mut current = active(NOW + 1_000, 1);
        current.ethereum.status = ChainStatus::Error;
        let d = details(record("swap_1_a"), current);
        let recs = recommendations(&d, 600);
        // Not ACTIVE, so no timeout advice
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].priority, Priority::Critical);
    }

    #[test]
    fn test_revealed_secret_with_unclaimed_htlc_is_flagged() {
        let mut current = active(NOW + 1_800, 1);
        current.ethereum.status = ChainStatus::Claimed;
        let d = details(record("swap_1_a"), current);
        assert_eq!(d.overall_status, OverallStatus::Pending);

        let recs = recommendations(&d, 600);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].priority, Priority::High);
        assert_eq!(recs[0].action, "Claim Bitcoin HTLC now");

        // Plenty of blocks left, nothing to flag
        let mut current = active(NOW + 1_800, 144);
        current.ethereum.status = ChainStatus::Claimed;
        let d = details(record("swap_1_a"), current);
        assert!(recommendations(&d, 600).is_empty());
    }

    #[test]
    fn test_timeline_adds_observed_claims_last() {
        let mut r = record("swap_1_a");
        r.legs
            .advance(SwapPhase::BitcoinHtlcCreated, None, r.created_at + Duration::seconds(1))
            .unwrap();
        let mut current = CurrentStatus::default();
        current.bitcoin.status = ChainStatus::Claimed;
        current.bitcoin.claim_tx = Some(TxId::new("claim"));

        let d = details(r, current);
        let events: Vec<String> = timeline(&d).into_iter().map(|e| e.event).collect();
        assert_eq!(
            events,
            vec!["SWAP_INITIATED", "BITCOIN_HTLC_CREATED", "BITCOIN_HTLC_CLAIMED"]
        );
    }

    #[test]
    fn test_csv_export() {
        let d = details(record("swap_1_a"), active(NOW + 7_200, 144));
        let report = build_report(&d, 600, Utc::now());
        let csv = export(&report, ExportFormat::Csv).unwrap();

        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("\"Field\",\"Value\""));
        assert!(csv.contains("\"Swap ID\",\"swap_1_a\""));
        assert!(csv.contains("\"Bitcoin Amount\",\"0.001\""));
        assert!(csv.contains("\"Ethereum Amount\",\"0.01\""));
        assert!(csv.contains("\"Status\",\"ACTIVE\""));
    }

    #[test]
    fn test_export_format_parsing() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        let err = "xml".parse::<ExportFormat>().unwrap_err();
        assert_eq!(err.error_code(), "validation_error");
    }

    #[test]
    fn test_csv_quotes_are_escaped() {
        assert_eq!(csv_cell("a\"b"), "\"a\"\"b\"");
    }

    #[test]
    fn test_summary_counts() {
        let mut done = record("swap_1_a");
        done.overall_status = OverallStatus::Completed;
        done.completed_at = Some(done.created_at + Duration::seconds(90));
        let mut failed = record("swap_2_b");
        failed.overall_status = OverallStatus::Error;
        let mut live = record("swap_3_c");
        live.overall_status = OverallStatus::Active;

        let summary = summarize(&[done, failed, live, record("swap_4_d")]);
        assert_eq!(summary.total_swaps, 4);
        assert_eq!(summary.completed_swaps, 1);
        assert_eq!(summary.failed_swaps, 1);
        assert_eq!(summary.active_swaps, 1);
        assert_eq!(summary.pending_swaps, 1);
        assert_eq!(summary.total_bitcoin_volume, "0.001");
        assert_eq!(summary.average_completion_secs, Some(90));
    }
}
