//! Application state shared across API handlers

use std::sync::Arc;
use std::time::Instant;

use atomic_swap::{CoordinatorSettings, Relayer, SwapCoordinator, SwapStore};
use portal_core::{AppConfig, Backend, BitcoinHtlc, EthereumEscrow, OrderProtocol};
use swap_report::SwapReportService;

/// Chain adapters the services are wired over
#[derive(Clone)]
pub struct Chains {
    pub bitcoin: Arc<dyn BitcoinHtlc>,
    pub ethereum: Arc<dyn EthereumEscrow>,
    /// Required for limit-order swaps only
    pub order_protocol: Option<Arc<dyn OrderProtocol>>,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    coordinator: SwapCoordinator,
    reports: SwapReportService,
    relayer: Relayer,
    backend: Backend,
    started_at: Instant,
}

impl AppState {
    /// Build the coordinator, report service and relayer over one set of chains
    pub fn new(chains: Chains, store: Arc<dyn SwapStore>, config: &AppConfig) -> Self {
        let mut coordinator = SwapCoordinator::new(
            chains.bitcoin.clone(),
            chains.ethereum.clone(),
            store.clone(),
            CoordinatorSettings::from_config(config),
        );
        if let Some(protocol) = chains.order_protocol {
            coordinator = coordinator.with_order_protocol(protocol);
        }

        let reports = SwapReportService::new(
            chains.bitcoin.clone(),
            chains.ethereum.clone(),
            store,
            config.coordinator.bitcoin_block_secs,
        );
        let relayer = Relayer::new(chains.bitcoin, chains.ethereum, config.relayer.clone());

        Self {
            inner: Arc::new(AppStateInner {
                coordinator,
                reports,
                relayer,
                backend: config.backend,
                started_at: Instant::now(),
            }),
        }
    }

    pub fn coordinator(&self) -> &SwapCoordinator {
        &self.inner.coordinator
    }

    pub fn reports(&self) -> &SwapReportService {
        &self.inner.reports
    }

    pub fn relayer(&self) -> &Relayer {
        &self.inner.relayer
    }

    pub fn backend(&self) -> Backend {
        self.inner.backend
    }

    /// Seconds since the state was built
    pub fn uptime_secs(&self) -> u64 {
        self.inner.started_at.elapsed().as_secs()
    }
}
