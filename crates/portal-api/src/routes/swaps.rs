//! Swap execution and lifecycle endpoints

use atomic_swap::SwapRequest;
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use portal_core::SwapMode;
use serde_json::Value;
use swap_report::public_record;

use crate::dto::{
    bad_request, path_swap_id, swap_failure, ApiResult, ExecuteSwapRequest, ExecuteSwapResponse,
};
use crate::AppState;

/// Routes under /api/swaps
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:id", get(get_swap))
        .route("/:id/complete", post(complete_swap))
        .route("/:id/refund", post(refund_swap))
        .route("/:id/abandon", post(abandon_swap))
}

/// POST /execute-real-swap
pub async fn execute_simple(
    State(state): State<AppState>,
    Json(request): Json<ExecuteSwapRequest>,
) -> ApiResult<ExecuteSwapResponse> {
    execute(&state, SwapMode::Simple, request).await
}

/// POST /execute-real-swap-with-lop
pub async fn execute_with_lop(
    State(state): State<AppState>,
    Json(request): Json<ExecuteSwapRequest>,
) -> ApiResult<ExecuteSwapResponse> {
    execute(&state, SwapMode::LimitOrder, request).await
}

/// POST /execute-real-partial-swap
pub async fn execute_partial(
    State(state): State<AppState>,
    Json(request): Json<ExecuteSwapRequest>,
) -> ApiResult<ExecuteSwapResponse> {
    execute(&state, SwapMode::Partial, request).await
}

async fn execute(
    state: &AppState,
    mode: SwapMode,
    request: ExecuteSwapRequest,
) -> ApiResult<ExecuteSwapResponse> {
    let (bitcoin_amount, ethereum_amount) = request.amounts()?;
    if mode != SwapMode::Partial && request.resolvers.is_some() {
        return Err(bad_request("resolvers are only accepted for partial swaps"));
    }

    tracing::info!(order_id = %request.order_id, %mode, "Executing swap");
    let record = state
        .coordinator()
        .execute(SwapRequest {
            order_id: request.order_id,
            bitcoin_amount,
            ethereum_amount,
            user_address: request.user_address.unwrap_or_default(),
            mode: Some(mode),
            resolvers: request.resolvers,
        })
        .await
        .map_err(swap_failure)?;

    Ok(Json(ExecuteSwapResponse::from(&record)))
}

/// GET /api/swaps/:id - Stored record, secrets withheld until revealed
pub async fn get_swap(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Value> {
    let record = state
        .coordinator()
        .get(&path_swap_id(&id)?)
        .await
        .map_err(swap_failure)?;
    Ok(Json(public_record(&record)))
}

/// POST /api/swaps/:id/complete - Reveal the secret and claim both legs
pub async fn complete_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let record = state
        .coordinator()
        .complete(&path_swap_id(&id)?)
        .await
        .map_err(swap_failure)?;
    Ok(Json(public_record(&record)))
}

/// POST /api/swaps/:id/refund - Reclaim whatever legs have timed out
pub async fn refund_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let record = state
        .coordinator()
        .refund(&path_swap_id(&id)?)
        .await
        .map_err(swap_failure)?;
    Ok(Json(public_record(&record)))
}

/// POST /api/swaps/:id/abandon - Stop driving the swap forward
pub async fn abandon_swap(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Value> {
    let record = state
        .coordinator()
        .abandon(&path_swap_id(&id)?)
        .await
        .map_err(swap_failure)?;
    Ok(Json(public_record(&record)))
}
