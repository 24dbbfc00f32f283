//! Swap status and reporting endpoints

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use swap_report::{
    public_record, BitcoinView, EthereumView, ReportSummary, SwapDetails, SwapReport, TrackSwap,
};

use crate::dto::{
    path_swap_id, swap_failure, ApiFailure, ApiResult, ExportQuery, SwapListResponse,
};
use crate::AppState;

/// Routes under /api/reports
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/swaps", get(list_swaps).post(track_swap))
        .route("/swaps/:id", get(swap_details))
        .route("/swaps/:id/report", post(generate_report))
        .route("/swaps/:id/export", get(export_report))
        .route("/summary", get(summary))
        .route("/bitcoin/htlc/:address/status", get(htlc_status))
        .route("/ethereum/escrow/:address/status", get(escrow_status))
}

/// GET /api/reports/swaps - Every stored swap, newest first
pub async fn list_swaps(State(state): State<AppState>) -> ApiResult<SwapListResponse> {
    let records = state.reports().list_swaps().await.map_err(swap_failure)?;
    let swaps: Vec<Value> = records.iter().map(public_record).collect();
    Ok(Json(SwapListResponse {
        count: swaps.len(),
        swaps,
    }))
}

/// POST /api/reports/swaps - Record a swap driven outside this service
pub async fn track_swap(
    State(state): State<AppState>,
    Json(data): Json<TrackSwap>,
) -> Result<(StatusCode, Json<Value>), ApiFailure> {
    let record = state.reports().track_swap(data).await.map_err(swap_failure)?;
    Ok((StatusCode::CREATED, Json(public_record(&record))))
}

/// GET /api/reports/swaps/:id - Stored record joined with live chain state
pub async fn swap_details(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SwapDetails> {
    let details = state
        .reports()
        .get_swap_details(&path_swap_id(&id)?)
        .await
        .map_err(swap_failure)?;
    Ok(Json(details))
}

/// POST /api/reports/swaps/:id/report - Build and persist a report
pub async fn generate_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SwapReport> {
    let report = state
        .reports()
        .generate_report(&path_swap_id(&id)?)
        .await
        .map_err(swap_failure)?;
    Ok(Json(report))
}

/// GET /api/reports/swaps/:id/export?format=json|csv
pub async fn export_report(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiFailure> {
    let swap_id = path_swap_id(&id)?;
    let format = query.format.unwrap_or_else(|| "json".to_string());
    let (format, body) = state
        .reports()
        .export_report(&swap_id, &format)
        .await
        .map_err(swap_failure)?;

    let disposition = format!(
        "attachment; filename=\"swap-report-{}.{}\"",
        id,
        format.extension()
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        body,
    )
        .into_response())
}

/// GET /api/reports/summary
pub async fn summary(State(state): State<AppState>) -> ApiResult<ReportSummary> {
    let summary = state.reports().summary().await.map_err(swap_failure)?;
    Ok(Json(summary))
}

/// GET /api/reports/bitcoin/htlc/:address/status
pub async fn htlc_status(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<BitcoinView> {
    Json(state.reports().bitcoin_htlc_status(&address).await)
}

/// GET /api/reports/ethereum/escrow/:address/status
pub async fn escrow_status(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Json<EthereumView> {
    Json(state.reports().ethereum_escrow_status(&address).await)
}
