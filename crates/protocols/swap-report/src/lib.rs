//! swap-report: status, reporting and export for Thunder Portal swaps
//!
//! Merges persisted swap records with live chain state. Chain queries that
//! fail show up as an `ERROR` sub-status rather than a failed request.

pub mod fetch;
pub mod report;
pub mod service;
pub mod state;

pub use portal_core::determine_overall_status;
pub use report::{ExportFormat, ETHEREUM_WARNING_SECS, BITCOIN_WARNING_SECS};
pub use service::SwapReportService;
pub use state::{
    public_record, BitcoinView, CurrentStatus, EthereumView, FillDetails, Priority, Recommendation,
    ReportSummary, SwapDetails, SwapReport, TimelineEntry, TrackSwap,
};
