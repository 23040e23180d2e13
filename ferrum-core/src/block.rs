use serde::{Deserialize, Serialize};

use crate::{AccountId, BlockTx, Error, MerkleTree};

/// Field order matches the canonical JSON tags: this is what gets hashed,
/// so declaration order here is load-bearing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: u64,
    pub prev_hash: String,
    pub timestamp: u64,
    pub beneficiary: AccountId,
    pub difficulty: u16,
    pub reward: u64,
    pub state_root: String,
    pub tx_root: String,
    pub nonce: u64,
}

/// A mined block: a header plus the Merkle tree of the transactions it
/// commits to.
#[derive(Debug, Clone)]
pub struct Block {
    pub header: BlockHeader,
    pub tree: MerkleTree<BlockTx>,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn txs(&self) -> Vec<BlockTx> {
        self.tree.values()
    }

    /// SHA-256 of the header's canonical JSON. Genesis (height 0) has no
    /// real predecessor, so its hash is fixed to the all-zero hash rather
    /// than computed.
    pub fn hash(&self) -> String {
        if self.header.height == 0 {
            return ferrum_crypto::ZERO_HASH.to_string();
        }
        ferrum_crypto::hash(&self.header)
    }

    pub fn to_block_data(&self) -> BlockData {
        BlockData { hash: self.hash(), header: self.header.clone(), txs: self.txs() }
    }

    /// Validates this block against its immediate predecessor and the
    /// state root computed from applying the predecessor's state,
    /// in order: height continuity, difficulty monotonicity, proof of
    /// work, previous-hash linkage, state root, transaction root. The
    /// height check is an explicit equality rather than a subtraction so
    /// a block claiming a height below the previous one cannot underflow
    /// its way past the check.
    pub fn validate(&self, prev_block: &Block, prev_state_root: &str) -> Result<(), Error> {
        let expected_height = prev_block.height() + 1;
        if self.header.height != expected_height {
            return Err(Error::ForkDetected { height: self.header.height, prev_height: prev_block.height() });
        }

        if self.header.difficulty < prev_block.header.difficulty {
            return Err(Error::DifficultyRegression {
                difficulty: self.header.difficulty,
                prev_difficulty: prev_block.header.difficulty,
            });
        }

        let reference = reference_prefix(self.header.difficulty);
        let hash = self.hash();
        if !is_solved(&reference, &hash) {
            return Err(Error::HashUnsolved { hash, reference });
        }

        let prev_hash = prev_block.hash();
        if self.header.prev_hash != prev_hash {
            return Err(Error::PrevHashMismatch { prev_hash: self.header.prev_hash.clone(), prev_block_hash: prev_hash });
        }

        if self.header.state_root != prev_state_root {
            return Err(Error::StateRootMismatch {
                state_root: self.header.state_root.clone(),
                prev_state_root: prev_state_root.to_string(),
            });
        }

        let tree_root = self.tree.root_hex();
        if self.header.tx_root != tree_root {
            return Err(Error::TxRootMismatch { tx_root: self.header.tx_root.clone(), tree_root });
        }

        Ok(())
    }
}

fn reference_prefix(difficulty: u16) -> String {
    "0".repeat((difficulty as usize).min(64))
}

fn is_solved(reference: &str, hash: &str) -> bool {
    let body = hash.strip_prefix("0x").unwrap_or(hash);
    matches!(body.get(..reference.len()), Some(prefix) if prefix == reference)
}

/// The on-disk / on-wire representation of a block: header plus the flat
/// list of transactions it contains, with the block hash cached alongside
/// so storage reads don't need to recompute it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockData {
    pub hash: String,
    pub header: BlockHeader,
    pub txs: Vec<BlockTx>,
}

impl BlockData {
    pub fn to_block(&self) -> Block {
        Block { header: self.header.clone(), tree: MerkleTree::new(self.txs.clone()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genesis() -> Block {
        Block {
            header: BlockHeader {
                height: 0,
                prev_hash: String::new(),
                timestamp: 0,
                beneficiary: AccountId::new("0x0ee5ba68586c85880B0900D0dEe0eEcBB37010e0").unwrap(),
                difficulty: 1,
                reward: 0,
                state_root: "0xroot".to_string(),
                tx_root: MerkleTree::<BlockTx>::new(vec![]).root_hex(),
                nonce: 0,
            },
            tree: MerkleTree::new(vec![]),
        }
    }

    #[test]
    fn genesis_hash_is_zero_hash() {
        assert_eq!(genesis().hash(), ferrum_crypto::ZERO_HASH);
    }

    #[test]
    fn height_mismatch_is_rejected() {
        let prev = genesis();
        let mut bad = prev.clone();
        bad.header.height = 5;
        let err = bad.validate(&prev, "0xroot").unwrap_err();
        assert!(matches!(err, Error::ForkDetected { height: 5, prev_height: 0 }));
    }

    #[test]
    fn difficulty_regression_is_rejected() {
        let prev = genesis();
        let mut bad = prev.clone();
        bad.header.height = 1;
        bad.header.difficulty = 0;
        let err = bad.validate(&prev, "0xroot").unwrap_err();
        assert!(matches!(err, Error::DifficultyRegression { .. }));
    }
}
