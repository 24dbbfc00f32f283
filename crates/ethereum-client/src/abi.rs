//! Minimal Solidity ABI encoding for the escrow, factory and LOP calls
//!
//! Every argument these contracts take is a static 32-byte word, so calls
//! are `selector ‖ word*` with no dynamic-type offsets.

use portal_core::{ChainError, ChainResult, Hash32};

pub const CREATE_ESCROW: &str = "createEscrow(bytes32,address,address,bytes32,uint256)";
pub const ESCROWS: &str = "escrows(bytes32)";
pub const CREATE_HTLC: &str = "createHTLC()";
pub const CLAIM_HTLC: &str = "claimHTLC(bytes32)";
pub const REFUND_HTLC: &str = "refundHTLC()";
pub const GET_STATUS: &str = "getStatus()";
pub const INITIATE_CROSS_CHAIN_SWAP: &str = "initiateCrossChainSwap(bytes32,uint256,uint256)";

/// Keccak-256 of `data`
pub fn keccak256(data: &[u8]) -> Hash32 {
    Hash32::keccak256(data)
}

/// First four bytes of the Keccak-256 of a canonical signature
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    let mut out = [0u8; 4];
    out.copy_from_slice(&hash.0[..4]);
    out
}

/// Order hash as the contracts key it: `keccak256(utf8(label))`
pub fn order_hash(label: &str) -> Hash32 {
    keccak256(label.as_bytes())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Address([u8; 20]),
    Bytes32(Hash32),
    Uint(u128),
}

impl Token {
    fn word(&self) -> [u8; 32] {
        let mut word = [0u8; 32];
        match self {
            Token::Address(addr) => word[12..].copy_from_slice(addr),
            Token::Bytes32(hash) => word.copy_from_slice(&hash.0),
            Token::Uint(value) => word[16..].copy_from_slice(&value.to_be_bytes()),
        }
        word
    }
}

/// Encode call data as `0x`-prefixed hex
pub fn encode_call(signature: &str, args: &[Token]) -> String {
    let mut data = Vec::with_capacity(4 + 32 * args.len());
    data.extend_from_slice(&selector(signature));
    for arg in args {
        data.extend_from_slice(&arg.word());
    }
    format!("0x{}", hex::encode(data))
}

/// Parse a `0x`-prefixed 20-byte address
pub fn parse_address(address: &str) -> ChainResult<[u8; 20]> {
    let trimmed = address
        .strip_prefix("0x")
        .or_else(|| address.strip_prefix("0X"))
        .ok_or_else(|| ChainError::validation(format!("address '{}' lacks 0x prefix", address)))?;
    let bytes = hex::decode(trimmed)
        .map_err(|_| ChainError::validation(format!("address '{}' is not hex", address)))?;
    if bytes.len() != 20 {
        return Err(ChainError::validation(format!(
            "address '{}' is {} bytes, expected 20",
            address,
            bytes.len()
        )));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

pub fn format_address(address: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(address))
}

/// Split `eth_call` return data into 32-byte words
pub fn decode_words(data: &str) -> ChainResult<Vec<[u8; 32]>> {
    let trimmed = data.strip_prefix("0x").unwrap_or(data);
    let bytes = hex::decode(trimmed)
        .map_err(|e| ChainError::validation(format!("return data is not hex: {}", e)))?;
    if bytes.len() % 32 != 0 {
        return Err(ChainError::validation(format!(
            "return data length {} is not a multiple of 32",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(32)
        .map(|chunk| {
            let mut word = [0u8; 32];
            word.copy_from_slice(chunk);
            word
        })
        .collect())
}

pub fn word_to_address(word: &[u8; 32]) -> [u8; 20] {
    let mut out = [0u8; 20];
    out.copy_from_slice(&word[12..]);
    out
}

pub fn word_to_bool(word: &[u8; 32]) -> bool {
    word[31] != 0
}

/// Values above `u128::MAX` are rejected rather than truncated
pub fn word_to_u128(word: &[u8; 32]) -> ChainResult<u128> {
    if word[..16].iter().any(|b| *b != 0) {
        return Err(ChainError::validation("uint256 exceeds u128"));
    }
    let mut low = [0u8; 16];
    low.copy_from_slice(&word[16..]);
    Ok(u128::from_be_bytes(low))
}

/// Hex-encode a quantity the way JSON-RPC expects (`0x0`, `0x1a`, ...)
pub fn quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

pub fn parse_quantity(value: &str) -> ChainResult<u128> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    if trimmed.is_empty() {
        return Ok(0);
    }
    u128::from_str_radix(trimmed, 16)
        .map_err(|e| ChainError::validation(format!("bad quantity '{}': {}", value, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_selectors() {
        // transfer(address,uint256)
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        // balanceOf(address)
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn test_keccak_empty() {
        assert_eq!(
            keccak256(b"").to_hex(),
            "c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470"
        );
    }

    #[test]
    fn test_encode_call_layout() {
        let addr = parse_address("0x70997970C51812dc3A010C7d01b50e0d17dc79C8").unwrap();
        let data = encode_call(
            CREATE_ESCROW,
            &[
                Token::Bytes32(Hash32([1u8; 32])),
                Token::Address(addr),
                Token::Address(addr),
                Token::Bytes32(Hash32([2u8; 32])),
                Token::Uint(3600),
            ],
        );
        // 0x + 4-byte selector + 5 words
        assert_eq!(data.len(), 2 + 8 + 5 * 64);
        assert!(data.ends_with(&format!("{:064x}", 3600)));
        assert!(data.contains("00000000000000000000000070997970c51812dc3a010c7d01b50e0d17dc79c8"));
    }

    #[test]
    fn test_decode_status_words() {
        let mut data = String::from("0x");
        data.push_str(&format!("{:064x}", 1)); // active
        data.push_str(&format!("{:064x}", 10_000_000_000_000_000u128)); // amount
        data.push_str(&format!("{:064x}", 1_700_000_000u64)); // timeout
        data.push_str(&format!("{:064x}", 0)); // claimed
        let words = decode_words(&data).unwrap();
        assert_eq!(words.len(), 4);
        assert!(word_to_bool(&words[0]));
        assert_eq!(word_to_u128(&words[1]).unwrap(), 10_000_000_000_000_000);
        assert!(!word_to_bool(&words[3]));
    }

    #[test]
    fn test_address_validation() {
        assert!(parse_address("70997970C51812dc3A010C7d01b50e0d17dc79C8").is_err());
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("0xzz997970C51812dc3A010C7d01b50e0d17dc79C8").is_err());
    }

    #[test]
    fn test_quantity() {
        assert_eq!(quantity(0), "0x0");
        assert_eq!(quantity(26), "0x1a");
        assert_eq!(parse_quantity("0x1a").unwrap(), 26);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
    }
}
