use serde::Serialize;
use sha2::{Digest, Sha256};

/// A binary Merkle tree over arbitrary hashable leaves. Leaves are hashed
/// as the SHA-256 of their canonical JSON encoding; odd node counts at any
/// level duplicate the last node ("duplicate-last" scheme).
#[derive(Debug, Clone)]
pub struct MerkleTree<T> {
    leaves: Vec<T>,
    root: [u8; 32],
}

impl<T: Serialize + Clone> MerkleTree<T> {
    /// Builds a tree from the given leaves, preserving their insertion
    /// order. An empty leaf set yields a tree with an empty root — blocks
    /// may contain zero transactions.
    pub fn new(leaves: Vec<T>) -> Self {
        let hashes: Vec<[u8; 32]> = leaves.iter().map(hash_leaf).collect();
        let root = compute_root(hashes);
        Self { leaves, root }
    }

    /// `"0x" + hex(root)`.
    pub fn root_hex(&self) -> String {
        format!("0x{}", hex::encode(self.root))
    }

    /// The original leaves, in insertion order.
    pub fn values(&self) -> Vec<T> {
        self.leaves.clone()
    }
}

fn hash_leaf<T: Serialize>(value: &T) -> [u8; 32] {
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    Sha256::digest(bytes).into()
}

fn hash_node(left: &[u8; 32], right: &[u8; 32]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

fn compute_root(mut level: Vec<[u8; 32]>) -> [u8; 32] {
    if level.is_empty() {
        return Sha256::digest([]).into();
    }
    while level.len() > 1 {
        if level.len() % 2 == 1 {
            level.push(*level.last().expect("level is non-empty"));
        }
        level = level.chunks(2).map(|pair| hash_node(&pair[0], &pair[1])).collect();
    }
    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_tree_has_stable_root() {
        let tree: MerkleTree<u64> = MerkleTree::new(vec![]);
        assert_eq!(tree.root_hex(), format!("0x{}", hex::encode(Sha256::digest([]))));
    }

    #[test]
    fn single_leaf_root_is_its_hash() {
        let tree = MerkleTree::new(vec![42u64]);
        let expected = hash_leaf(&42u64);
        assert_eq!(tree.root_hex(), format!("0x{}", hex::encode(expected)));
    }

    #[test]
    fn odd_leaf_count_duplicates_last() {
        let three = MerkleTree::new(vec![1u64, 2, 3]);
        let four = MerkleTree::new(vec![1u64, 2, 3, 3]);
        assert_eq!(three.root_hex(), four.root_hex());
    }

    #[test]
    fn values_preserve_insertion_order() {
        let tree = MerkleTree::new(vec![3u64, 1, 2]);
        assert_eq!(tree.values(), vec![3, 1, 2]);
    }
}
