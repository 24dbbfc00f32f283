//! Live chain observation
//!
//! Every query degrades to an `ERROR` view for that chain instead of
//! failing the whole status request.

use atomic_swap::state::{BitcoinLeg, EthereumLeg, LegPair};
use portal_core::{BitcoinHtlc, ChainStatus, EthereumEscrow};

use crate::state::{BitcoinView, CurrentStatus, EthereumView};

/// Query an HTLC address directly
pub async fn bitcoin_htlc_status(bitcoin: &dyn BitcoinHtlc, address: &str) -> BitcoinView {
    match bitcoin.htlc_status(address).await {
        Ok(obs) => BitcoinView {
            address: Some(obs.address),
            status: obs.status,
            balance: Some(obs.balance),
            tx_count: Some(obs.tx_count),
            claim_tx: obs.claim_tx,
            refund_tx: obs.refund_tx,
            current_height: Some(obs.current_height),
            timeout_height: None,
            error: None,
        },
        Err(e) => {
            tracing::warn!(address, error = %e, "Bitcoin HTLC status unavailable");
            BitcoinView {
                address: Some(address.to_string()),
                status: ChainStatus::Error,
                error: Some(e.to_string()),
                ..Default::default()
            }
        }
    }
}

/// Query an escrow address directly
pub async fn ethereum_escrow_status(ethereum: &dyn EthereumEscrow, address: &str) -> EthereumView {
    match ethereum.escrow_status(address).await {
        Ok(obs) => EthereumView {
            address: Some(obs.address.clone()),
            status: obs.status(),
            active: Some(obs.active),
            balance: Some(obs.amount),
            timeout: Some(obs.timeout),
            claimed: Some(obs.claimed),
            error: None,
        },
        Err(e) => {
            tracing::warn!(address, error = %e, "Ethereum escrow status unavailable");
            EthereumView {
                address: Some(address.to_string()),
                status: ChainStatus::Error,
                error: Some(e.to_string()),
                ..Default::default()
            }
        }
    }
}

/// Live view of a recorded Bitcoin leg. A leg without an HTLC yet reports
/// its recorded status.
pub async fn observe_bitcoin(bitcoin: &dyn BitcoinHtlc, leg: &BitcoinLeg) -> BitcoinView {
    let mut view = match &leg.htlc_address {
        Some(address) => bitcoin_htlc_status(bitcoin, address).await,
        None => BitcoinView {
            status: leg.status,
            ..Default::default()
        },
    };
    view.timeout_height = leg.timeout_height;
    view
}

pub async fn observe_ethereum(ethereum: &dyn EthereumEscrow, leg: &EthereumLeg) -> EthereumView {
    match &leg.escrow_address {
        Some(address) => ethereum_escrow_status(ethereum, address).await,
        None => EthereumView {
            status: leg.status,
            timeout: leg.timeout,
            ..Default::default()
        },
    }
}

/// Both legs of a pair, queried concurrently
pub async fn observe_pair(
    bitcoin: &dyn BitcoinHtlc,
    ethereum: &dyn EthereumEscrow,
    legs: &LegPair,
) -> CurrentStatus {
    let (bitcoin, ethereum) = tokio::join!(
        observe_bitcoin(bitcoin, &legs.bitcoin),
        observe_ethereum(ethereum, &legs.ethereum)
    );
    CurrentStatus { bitcoin, ethereum }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomic_swap::{SimulatedBitcoin, SimulatedEthereum};
    use portal_core::{Hash32, OverallStatus};

    const PUBKEY: &str = "0279BE667EF9DCBBAC55A06295CE870B07029BFCDB2DCE28D959F2815B16F81798";

    #[tokio::test]
    async fn test_unknown_addresses_degrade_to_error() {
        let btc = SimulatedBitcoin::new(1_000_000, 1_000);
        let eth = SimulatedEthereum::new(10u128.pow(18), 1_700_000_000);

        let view = bitcoin_htlc_status(&btc, "bcrt1qmissing").await;
        assert_eq!(view.status, ChainStatus::Error);
        assert!(view.error.is_some());

        let view = ethereum_escrow_status(&eth, "0xmissing").await;
        assert_eq!(view.status, ChainStatus::Error);
    }

    #[tokio::test]
    async fn test_inconsistent_views_still_resolve() {
        let btc = SimulatedBitcoin::new(1_000_000, 1_000);
        let eth = SimulatedEthereum::new(10u128.pow(18), 1_700_000_000);
        let htlc = btc.create_htlc(&Hash32::sha256(b"x"), PUBKEY, 10).await.unwrap();
        btc.fund_htlc(&htlc.address, 10_000).await.unwrap();

        let mut legs = LegPair::new(chrono::Utc::now());
        legs.bitcoin.htlc_address = Some(htlc.address.clone());
        legs.bitcoin.timeout_height = Some(htlc.timeout_height);
        // Escrow recorded but unreachable
        legs.ethereum.escrow_address = Some("0xgone".into());

        let current = observe_pair(&btc, &eth, &legs).await;
        assert_eq!(current.bitcoin.status, ChainStatus::Funded);
        assert_eq!(current.bitcoin.timeout_height, Some(htlc.timeout_height));
        assert_eq!(current.ethereum.status, ChainStatus::Error);
        assert_eq!(current.overall(), OverallStatus::Error);
    }

    #[tokio::test]
    async fn test_unobserved_leg_uses_recorded_status() {
        let btc = SimulatedBitcoin::new(1_000_000, 1_000);
        let eth = SimulatedEthereum::new(10u128.pow(18), 1_700_000_000);
        let legs = LegPair::new(chrono::Utc::now());
        let current = observe_pair(&btc, &eth, &legs).await;
        assert_eq!(current.bitcoin.status, ChainStatus::Pending);
        assert_eq!(current.overall(), OverallStatus::Pending);
    }
}
