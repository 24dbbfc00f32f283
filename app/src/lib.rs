//! Thunder Portal service wiring
//!
//! Loads configuration, builds the chain adapters for the selected backend,
//! and serves the API until interrupted.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use atomic_swap::{FileSwapStore, SimulatedBitcoin, SimulatedEthereum};
use bitcoin_client::BitcoinClient;
use ethereum_client::EthereumClient;
use portal_api::{AppState, Chains};
use portal_core::{AppConfig, Backend};
use tokio::sync::watch;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "THUNDER_PORTAL_CONFIG";

/// Starting balances for the simulated backend: 10 BTC, 100 ETH
const SIM_BITCOIN_WALLET: u64 = 1_000_000_000;
const SIM_ETHEREUM_BALANCE: u128 = 100 * 1_000_000_000_000_000_000;

/// `--config <path>` wins over the environment variable
pub fn config_path<I>(args: I, env: Option<String>) -> Option<PathBuf>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(PathBuf::from(path));
        }
    }
    env.filter(|p| !p.is_empty()).map(PathBuf::from)
}

/// Chain adapters plus an optional driver task for simulated chains
pub async fn build_chains(
    config: &AppConfig,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<Chains> {
    match config.backend {
        Backend::Rpc => {
            let bitcoin = BitcoinClient::new(&config.bitcoin).context("Bitcoin client")?;
            let ethereum = Arc::new(
                EthereumClient::connect(&config.ethereum)
                    .await
                    .context("Ethereum client")?,
            );
            Ok(Chains {
                bitcoin: Arc::new(bitcoin),
                ethereum: ethereum.clone(),
                order_protocol: Some(ethereum),
            })
        }
        Backend::Simulated => {
            let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default();
            let bitcoin = Arc::new(SimulatedBitcoin::new(SIM_BITCOIN_WALLET, config.bitcoin.fee_sats));
            let ethereum = Arc::new(SimulatedEthereum::new(SIM_ETHEREUM_BALANCE, now));
            tokio::spawn(drive_simulated_chains(
                bitcoin.clone(),
                ethereum.clone(),
                config.coordinator.bitcoin_block_secs,
                shutdown,
            ));
            tracing::warn!("Using simulated chains; no funds move on any real network");
            Ok(Chains {
                bitcoin,
                ethereum: ethereum.clone(),
                order_protocol: Some(ethereum),
            })
        }
    }
}

/// Keep simulated clocks moving: one Ethereum second per second, one
/// Bitcoin block per `block_secs`.
async fn drive_simulated_chains(
    bitcoin: Arc<SimulatedBitcoin>,
    ethereum: Arc<SimulatedEthereum>,
    block_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    let mut elapsed = 0u64;
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }
        ethereum.advance_time(1).await;
        elapsed += 1;
        if block_secs > 0 && elapsed % block_secs == 0 {
            bitcoin.mine(1).await;
        }
    }
}

/// Serve until ctrl-c
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let store = FileSwapStore::open(&config.store.data_dir)
        .await
        .with_context(|| format!("opening swap store at {}", config.store.data_dir))?;
    let chains = build_chains(&config, shutdown_rx.clone()).await?;
    let state = AppState::new(chains, Arc::new(store), &config);

    tracing::info!(
        backend = ?config.backend,
        port = config.api_port,
        data_dir = %config.store.data_dir,
        "Thunder Portal starting"
    );

    let mut server_shutdown = shutdown_rx;
    let server = portal_api::start_server(state.clone(), config.api_port, async move {
        let _ = server_shutdown.changed().await;
    });
    let mut server = tokio::spawn(server);

    tokio::select! {
        result = &mut server => {
            // Server exited on its own, typically a bind failure
            shutdown_tx.send_replace(true);
            state.relayer().shutdown().await;
            return result.context("server task")?.context("API server");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("installing ctrl-c handler")?;
        }
    }
    tracing::info!("Shutdown requested");
    shutdown_tx.send_replace(true);

    state.relayer().shutdown().await;
    server.await.context("server task")?.context("API server")?;
    tracing::info!("Thunder Portal stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use portal_core::{BitcoinHtlc, EthereumEscrow};

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_config_path_precedence() {
        assert_eq!(
            config_path(args(&["thunder-portal", "--config", "a.json"]), Some("b.json".into())),
            Some(PathBuf::from("a.json"))
        );
        assert_eq!(
            config_path(args(&["thunder-portal", "--config=c.json"]), None),
            Some(PathBuf::from("c.json"))
        );
        assert_eq!(
            config_path(args(&["thunder-portal"]), Some("b.json".into())),
            Some(PathBuf::from("b.json"))
        );
        assert_eq!(config_path(args(&["thunder-portal"]), Some(String::new())), None);
        assert_eq!(config_path(args(&["thunder-portal", "--config"]), None), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_chains_advance() {
        let config = AppConfig {
            backend: Backend::Simulated,
            ..AppConfig::default()
        };
        let (tx, rx) = watch::channel(false);
        let chains = build_chains(&config, rx).await.unwrap();
        let start = chains.ethereum.timestamp().await.unwrap();
        let height = chains.bitcoin.block_height().await.unwrap();

        tokio::time::sleep(Duration::from_secs(601)).await;
        assert!(chains.ethereum.timestamp().await.unwrap() >= start + 600);
        assert!(chains.bitcoin.block_height().await.unwrap() > height);
        tx.send_replace(true);
    }
}
