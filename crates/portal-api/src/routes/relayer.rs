//! Relayer endpoints

use atomic_swap::{WatchInfo, WatchRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};

use crate::dto::{swap_failure, ActiveSwapsResponse, ApiError, ApiResult};
use crate::AppState;

/// Routes under /relayer
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/monitor-swap", post(monitor_swap))
        .route("/swap-status/:order_id", get(swap_status))
        .route("/active-swaps", get(active_swaps))
        .route("/simulate-bitcoin-funding/:order_id", post(simulate_funding))
}

/// POST /relayer/monitor-swap - Watch an HTLC and create the escrow once it confirms
pub async fn monitor_swap(
    State(state): State<AppState>,
    Json(request): Json<WatchRequest>,
) -> ApiResult<WatchInfo> {
    let info = state.relayer().monitor(request).await.map_err(swap_failure)?;
    Ok(Json(info))
}

/// GET /relayer/swap-status/:order_id
pub async fn swap_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<WatchInfo> {
    state.relayer().status(&order_id).await.map(Json).ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ApiError::not_found(format!("No watch for order {}", order_id))),
        )
    })
}

/// GET /relayer/active-swaps
pub async fn active_swaps(State(state): State<AppState>) -> Json<ActiveSwapsResponse> {
    let swaps = state.relayer().list_active().await;
    Json(ActiveSwapsResponse {
        count: swaps.len(),
        swaps,
    })
}

/// POST /relayer/simulate-bitcoin-funding/:order_id - Relay without waiting
pub async fn simulate_funding(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> ApiResult<WatchInfo> {
    let info = state
        .relayer()
        .simulate_bitcoin_funding(&order_id)
        .await
        .map_err(swap_failure)?;
    Ok(Json(info))
}

#[cfg(test)]
mod tests {
    use atomic_swap::sim::SIM_SIGNER;
    use axum::http::StatusCode;
    use portal_core::{BitcoinHtlc, Hash32, Secret};
    use serde_json::json;

    use crate::routes::test_support::{send_json, test_app, TestApp, USER};

    const PUBKEY: &str = "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798";

    async fn watch_body(t: &TestApp, order_id: &str) -> serde_json::Value {
        let hashlock = Secret::from_bytes([9u8; 32]).hashlock();
        let htlc = t.btc.create_htlc(&hashlock, PUBKEY, 144).await.unwrap();
        let txid = t.btc.fund_htlc(&htlc.address, 50_000).await.unwrap();
        json!({
            "orderId": order_id,
            "orderHash": Hash32::keccak256(order_id.as_bytes()),
            "htlcAddress": htlc.address,
            "maker": SIM_SIGNER,
            "receiver": USER,
            "hashlock": hashlock,
            "timeout": 1_700_003_600u64,
            "bitcoinTxid": txid,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_and_simulate_funding() {
        let t = test_app();
        t.btc.set_auto_mine(false).await;
        let body = watch_body(&t, "relay-api-1").await;

        let (status, info) = send_json(&t.app, "POST", "/relayer/monitor-swap", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["status"], "AWAITING_BITCOIN_FUNDING");

        let (_, active) = send_json(&t.app, "GET", "/relayer/active-swaps", None).await;
        assert_eq!(active["count"], 1);

        let (status, info) = send_json(
            &t.app,
            "POST",
            "/relayer/simulate-bitcoin-funding/relay-api-1",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["status"], "AWAITING_ETHEREUM_FUNDING");
        assert!(info["escrowAddress"].is_string());

        let (status, info) =
            send_json(&t.app, "GET", "/relayer/swap-status/relay-api-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["status"], "AWAITING_ETHEREUM_FUNDING");

        t.state.relayer().shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_watch_rejected() {
        let t = test_app();
        t.btc.set_auto_mine(false).await;
        let body = watch_body(&t, "relay-api-2").await;

        let (status, _) =
            send_json(&t.app, "POST", "/relayer/monitor-swap", Some(body.clone())).await;
        assert_eq!(status, StatusCode::OK);
        let (status, err) = send_json(&t.app, "POST", "/relayer/monitor-swap", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(err["code"], "validation_error");

        t.state.relayer().shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_order() {
        let t = test_app();
        let (status, _) = send_json(&t.app, "GET", "/relayer/swap-status/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, err) =
            send_json(&t.app, "POST", "/relayer/simulate-bitcoin-funding/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(err["code"], "not_found");
    }
}
