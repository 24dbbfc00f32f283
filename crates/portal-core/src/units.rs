//! Chain-native amount units
//!
//! Amounts never pass through floating point. Decimal strings from clients
//! are parsed into integer base units: satoshis for Bitcoin, wei for Ethereum.

use thiserror::Error;

/// Satoshis
pub type Sats = u64;

/// Wei
pub type Wei = u128;

pub const BTC_DECIMALS: u32 = 8;
pub const ETH_DECIMALS: u32 = 18;
pub const SATS_PER_BTC: Sats = 100_000_000;
pub const WEI_PER_ETH: Wei = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("Amount is empty")]
    Empty,

    #[error("Invalid amount '{0}'")]
    Invalid(String),

    #[error("Amount '{value}' has more than {decimals} decimal places")]
    TooPrecise { value: String, decimals: u32 },

    #[error("Amount '{0}' overflows")]
    Overflow(String),

    #[error("Amount must be positive")]
    Zero,
}

/// Parse a non-negative decimal string into base units with `decimals` places.
pub fn parse_fixed(value: &str, decimals: u32) -> Result<u128, AmountError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(AmountError::Empty);
    }

    let (whole, frac) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(AmountError::Invalid(value.to_string()));
    }
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(whole) || !all_digits(frac) {
        return Err(AmountError::Invalid(value.to_string()));
    }
    if frac.len() as u32 > decimals {
        return Err(AmountError::TooPrecise {
            value: value.to_string(),
            decimals,
        });
    }

    let overflow = || AmountError::Overflow(value.to_string());
    let scale = 10u128.checked_pow(decimals).ok_or_else(overflow)?;

    let whole_units: u128 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| overflow())?
    };

    let frac_units: u128 = if frac.is_empty() {
        0
    } else {
        let padded = format!("{:0<width$}", frac, width = decimals as usize);
        padded.parse().map_err(|_| overflow())?
    };

    whole_units
        .checked_mul(scale)
        .and_then(|w| w.checked_add(frac_units))
        .ok_or_else(overflow)
}

/// Format base units as a decimal string, trimming trailing zeros.
pub fn format_fixed(units: u128, decimals: u32) -> String {
    let scale = 10u128.pow(decimals);
    let whole = units / scale;
    let frac = units % scale;
    if frac == 0 {
        return whole.to_string();
    }
    let frac_str = format!("{:0>width$}", frac, width = decimals as usize);
    format!("{}.{}", whole, frac_str.trim_end_matches('0'))
}

/// "0.001" -> 100_000 sats. Zero is rejected.
pub fn parse_btc(value: &str) -> Result<Sats, AmountError> {
    let units = parse_fixed(value, BTC_DECIMALS)?;
    if units == 0 {
        return Err(AmountError::Zero);
    }
    Sats::try_from(units).map_err(|_| AmountError::Overflow(value.to_string()))
}

/// "0.01" -> 10_000_000_000_000_000 wei. Zero is rejected.
pub fn parse_eth(value: &str) -> Result<Wei, AmountError> {
    let units = parse_fixed(value, ETH_DECIMALS)?;
    if units == 0 {
        return Err(AmountError::Zero);
    }
    Ok(units)
}

pub fn format_btc(sats: Sats) -> String {
    format_fixed(sats as u128, BTC_DECIMALS)
}

pub fn format_eth(wei: Wei) -> String {
    format_fixed(wei, ETH_DECIMALS)
}

/// Serialize `u128` as a decimal string (JSON numbers lose precision past 2^53).
pub mod u128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_btc() {
        assert_eq!(parse_btc("0.001").unwrap(), 100_000);
        assert_eq!(parse_btc("1").unwrap(), SATS_PER_BTC);
        assert_eq!(parse_btc(".5").unwrap(), 50_000_000);
        assert_eq!(parse_btc("0.00000001").unwrap(), 1);
    }

    #[test]
    fn test_parse_eth() {
        assert_eq!(parse_eth("0.01").unwrap(), 10_000_000_000_000_000);
        assert_eq!(parse_eth("2").unwrap(), 2 * WEI_PER_ETH);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!(parse_btc(""), Err(AmountError::Empty));
        assert_eq!(parse_btc("0"), Err(AmountError::Zero));
        assert!(matches!(parse_btc("-1"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_btc("1e3"), Err(AmountError::Invalid(_))));
        assert!(matches!(parse_btc("."), Err(AmountError::Invalid(_))));
        assert!(matches!(
            parse_btc("0.000000001"),
            Err(AmountError::TooPrecise { .. })
        ));
    }

    #[test]
    fn test_format() {
        assert_eq!(format_btc(100_000), "0.001");
        assert_eq!(format_btc(SATS_PER_BTC), "1");
        assert_eq!(format_eth(10_000_000_000_000_000), "0.01");
        assert_eq!(format_eth(1), "0.000000000000000001");
    }
}
