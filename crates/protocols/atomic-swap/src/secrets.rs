//! Preimage and chunk-secret generation
//!
//! Every secret is drawn straight from the operating system RNG. A failing
//! source is an error; there is no fallback generator.

use portal_core::{Hash32, Secret};
use rand::rngs::OsRng;
use rand::RngCore;

use crate::error::{SwapError, SwapResult};

/// Number of 1% chunks in a partial-fill order
pub const CHUNK_COUNT: usize = 100;

/// Chunk secrets plus the full-fill secret at index 100
pub const SECRET_COUNT: usize = CHUNK_COUNT + 1;

/// Index of the secret that fills the whole order in one go
pub const FULL_FILL_INDEX: u32 = CHUNK_COUNT as u32;

/// A fresh preimage and its SHA-256 hashlock
pub fn generate_simple_commitment() -> SwapResult<(Secret, Hash32)> {
    generate_commitment_with(&mut OsRng)
}

pub fn generate_commitment_with<R: RngCore>(rng: &mut R) -> SwapResult<(Secret, Hash32)> {
    let secret = random_secret(rng)?;
    let hash = secret.hashlock();
    Ok((secret, hash))
}

/// 101 independently random secrets and their hashes
#[derive(Clone)]
pub struct ChunkSecrets {
    pub secrets: Vec<Secret>,
    pub hashed: Vec<Hash32>,
}

pub fn generate_chunk_secrets() -> SwapResult<ChunkSecrets> {
    generate_chunk_secrets_with(&mut OsRng)
}

pub fn generate_chunk_secrets_with<R: RngCore>(rng: &mut R) -> SwapResult<ChunkSecrets> {
    let mut secrets = Vec::with_capacity(SECRET_COUNT);
    for _ in 0..SECRET_COUNT {
        secrets.push(random_secret(rng)?);
    }
    let hashed = secrets.iter().map(Secret::hashlock).collect();
    Ok(ChunkSecrets { secrets, hashed })
}

fn random_secret<R: RngCore>(rng: &mut R) -> SwapResult<Secret> {
    let mut bytes = [0u8; 32];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| SwapError::Entropy(e.to_string()))?;
    Ok(Secret::from_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            0
        }
        fn next_u64(&mut self) -> u64 {
            0
        }
        fn fill_bytes(&mut self, dest: &mut [u8]) {
            dest.fill(0);
        }
        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new("entropy pool unavailable"))
        }
    }

    #[test]
    fn test_simple_commitment_hash() {
        let (secret, hash) = generate_simple_commitment().unwrap();
        assert_eq!(hash, Hash32::sha256(secret.as_bytes()));
    }

    #[test]
    fn test_chunk_secrets_distinct_and_hashed() {
        let chunks = generate_chunk_secrets().unwrap();
        assert_eq!(chunks.secrets.len(), SECRET_COUNT);
        assert_eq!(chunks.hashed.len(), SECRET_COUNT);

        for (secret, hash) in chunks.secrets.iter().zip(&chunks.hashed) {
            assert_eq!(*hash, secret.hashlock());
        }

        let unique: HashSet<[u8; 32]> = chunks.secrets.iter().map(|s| *s.as_bytes()).collect();
        assert_eq!(unique.len(), SECRET_COUNT);
    }

    #[test]
    fn test_entropy_failure_is_fatal() {
        let err = generate_chunk_secrets_with(&mut BrokenRng).err().unwrap();
        assert_eq!(err.error_code(), "entropy_failure");
        assert!(generate_commitment_with(&mut BrokenRng).is_err());
    }
}
