//! API route handlers

pub mod health;
pub mod relayer;
pub mod reports;
pub mod swaps;

use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

/// Create the API router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/execute-real-swap", post(swaps::execute_simple))
        .route("/execute-real-swap-with-lop", post(swaps::execute_with_lop))
        .route("/execute-real-partial-swap", post(swaps::execute_partial))
        .nest("/api/swaps", swaps::router())
        .nest("/api/reports", reports::router())
        .nest("/relayer", relayer::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use atomic_swap::{MemorySwapStore, SimulatedBitcoin, SimulatedEthereum};
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use portal_core::{AppConfig, Backend};
    use tower::ServiceExt;

    use crate::{create_app, AppState, Chains};

    pub const USER: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    pub struct TestApp {
        pub btc: Arc<SimulatedBitcoin>,
        pub eth: Arc<SimulatedEthereum>,
        pub state: AppState,
        pub app: Router,
    }

    pub fn test_app() -> TestApp {
        let btc = Arc::new(SimulatedBitcoin::new(100_000_000, 1_000));
        let eth = Arc::new(SimulatedEthereum::new(100 * 10u128.pow(18), 1_700_000_000));
        let config = AppConfig {
            backend: Backend::Simulated,
            ..AppConfig::default()
        };
        let chains = Chains {
            bitcoin: btc.clone(),
            ethereum: eth.clone(),
            order_protocol: Some(eth.clone()),
        };
        let state = AppState::new(chains, Arc::new(MemorySwapStore::new()), &config);
        TestApp {
            btc,
            eth,
            app: create_app(state.clone()),
            state,
        }
    }

    /// Send one request and return status and raw body
    pub async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, Vec<u8>) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec())
    }

    pub async fn send_json(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let (status, bytes) = send(app, method, uri, body).await;
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    pub fn simple_swap(order_id: &str) -> serde_json::Value {
        serde_json::json!({
            "orderId": order_id,
            "bitcoinAmount": "0.001",
            "ethereumAmount": "0.01",
            "userAddress": USER,
        })
    }
}
