//! Merkle tree over chunk secrets
//!
//! Leaves bind the chunk index: `leaf[i] = sha256(be32(i) ‖ hashed[i])`.
//! Inner nodes hash the sorted pair, so a proof is just the list of
//! siblings with no left/right flags. An unpaired node at the end of a
//! level is promoted unchanged.

use portal_core::{Hash32, Secret};

use crate::error::{SwapError, SwapResult};

pub fn leaf(index: u32, hashed_secret: &Hash32) -> Hash32 {
    let mut data = [0u8; 36];
    data[..4].copy_from_slice(&index.to_be_bytes());
    data[4..].copy_from_slice(hashed_secret.as_bytes());
    Hash32::sha256(&data)
}

fn hash_pair(a: &Hash32, b: &Hash32) -> Hash32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut data = [0u8; 64];
    data[..32].copy_from_slice(lo.as_bytes());
    data[32..].copy_from_slice(hi.as_bytes());
    Hash32::sha256(&data)
}

#[derive(Debug, Clone)]
pub struct MerkleTree {
    /// levels[0] are the leaves, the last level holds only the root
    levels: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    /// Build from hashed secrets (index i of the slice is chunk i)
    pub fn build(hashed_secrets: &[Hash32]) -> SwapResult<Self> {
        if hashed_secrets.is_empty() {
            return Err(SwapError::validation("cannot build a Merkle tree without leaves"));
        }

        let leaves: Vec<Hash32> = hashed_secrets
            .iter()
            .enumerate()
            .map(|(i, h)| leaf(i as u32, h))
            .collect();

        let mut levels = vec![leaves];
        while levels.last().map_or(0, Vec::len) > 1 {
            let current = &levels[levels.len() - 1];
            let next = current
                .chunks(2)
                .map(|pair| match pair.get(1) {
                    Some(right) => hash_pair(&pair[0], right),
                    None => pair[0],
                })
                .collect();
            levels.push(next);
        }

        Ok(Self { levels })
    }

    pub fn root(&self) -> Hash32 {
        self.levels
            .last()
            .and_then(|level| level.first())
            .copied()
            .unwrap_or(Hash32::ZERO)
    }

    pub fn leaf_count(&self) -> usize {
        self.levels[0].len()
    }

    pub fn leaf(&self, index: u32) -> Option<Hash32> {
        self.levels[0].get(index as usize).copied()
    }

    /// Sibling hashes from leaf to root
    pub fn proof(&self, index: u32) -> SwapResult<Vec<Hash32>> {
        let mut position = index as usize;
        if position >= self.leaf_count() {
            return Err(SwapError::Merkle { index });
        }

        let mut proof = Vec::new();
        for level in &self.levels[..self.levels.len() - 1] {
            let sibling = position ^ 1;
            if let Some(hash) = level.get(sibling) {
                proof.push(*hash);
            }
            position /= 2;
        }
        Ok(proof)
    }
}

/// Fold `proof` up from `leaf` and compare with `root`
pub fn verify(proof: &[Hash32], leaf: &Hash32, root: &Hash32) -> bool {
    let computed = proof.iter().fold(*leaf, |acc, sibling| hash_pair(&acc, sibling));
    computed == *root
}

/// Full chunk check: the secret hashes into the leaf for `index` and the
/// leaf folds up to `root`.
pub fn verify_chunk(index: u32, secret: &Secret, proof: &[Hash32], root: &Hash32) -> bool {
    let expected_leaf = leaf(index, &secret.hashlock());
    verify(proof, &expected_leaf, root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrets::{generate_chunk_secrets, SECRET_COUNT};

    fn tree() -> (MerkleTree, Vec<Secret>) {
        let chunks = generate_chunk_secrets().unwrap();
        (MerkleTree::build(&chunks.hashed).unwrap(), chunks.secrets)
    }

    #[test]
    fn test_every_proof_verifies() {
        let (tree, _) = tree();
        let root = tree.root();
        assert_eq!(tree.leaf_count(), SECRET_COUNT);

        for i in 0..SECRET_COUNT as u32 {
            let proof = tree.proof(i).unwrap();
            assert!(proof.len() <= 7, "proof for {} has {} siblings", i, proof.len());
            assert!(verify(&proof, &tree.leaf(i).unwrap(), &root), "index {}", i);
        }
    }

    #[test]
    fn test_proof_does_not_verify_other_leaf() {
        let (tree, _) = tree();
        let root = tree.root();

        for i in 0..SECRET_COUNT as u32 {
            let proof = tree.proof(i).unwrap();
            for j in 0..SECRET_COUNT as u32 {
                if i != j {
                    assert!(!verify(&proof, &tree.leaf(j).unwrap(), &root), "{} vs {}", i, j);
                }
            }
        }
    }

    #[test]
    fn test_verify_chunk_binds_index_and_secret() {
        let (tree, secrets) = tree();
        let root = tree.root();
        let proof = tree.proof(42).unwrap();

        assert!(verify_chunk(42, &secrets[42], &proof, &root));
        // Right secret, wrong index
        assert!(!verify_chunk(43, &secrets[42], &proof, &root));
        // Right index, wrong secret
        assert!(!verify_chunk(42, &secrets[41], &proof, &root));
    }

    #[test]
    fn test_odd_level_promotes_last_node() {
        let hashed: Vec<Hash32> = (0u8..3).map(|i| Hash32::sha256(&[i])).collect();
        let tree = MerkleTree::build(&hashed).unwrap();

        // Leaf 2 has no sibling on the first level
        let proof = tree.proof(2).unwrap();
        assert_eq!(proof.len(), 1);
        assert!(verify(&proof, &tree.leaf(2).unwrap(), &tree.root()));
    }

    #[test]
    fn test_out_of_range_and_empty() {
        let (tree, _) = tree();
        assert!(matches!(tree.proof(101), Err(SwapError::Merkle { index: 101 })));
        assert!(MerkleTree::build(&[]).is_err());
    }
}
