//! UTXO selection for HTLC funding
//!
//! Largest-first until the target plus the fixed fee is covered.

use portal_core::{ChainError, Sats, Utxo};

// =============================================================================
// Selected inputs result
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectedInputs {
    pub inputs: Vec<Utxo>,
    pub total: Sats,
    /// `total - amount - fee`; zero means no change output
    pub change: Sats,
}

// =============================================================================
// Selection
// =============================================================================

/// Select the fewest (largest) outputs covering `amount + fee`.
pub fn select_utxos(utxos: &[Utxo], amount: Sats, fee: Sats) -> Result<SelectedInputs, ChainError> {
    let required = amount
        .checked_add(fee)
        .ok_or_else(|| ChainError::validation("amount plus fee overflows"))?;

    let mut sorted: Vec<&Utxo> = utxos.iter().collect();
    sorted.sort_by(|a, b| b.amount.cmp(&a.amount));

    let mut inputs = Vec::new();
    let mut total: Sats = 0;
    for utxo in sorted {
        if total >= required {
            break;
        }
        total = total.saturating_add(utxo.amount);
        inputs.push(utxo.clone());
    }

    if total < required {
        let available: Sats = utxos.iter().map(|u| u.amount).sum();
        return Err(ChainError::InsufficientFunds {
            required: required as u128,
            available: available as u128,
        });
    }

    Ok(SelectedInputs {
        inputs,
        total,
        change: total - required,
    })
}
