/// Binary Merkle tree with inclusion proofs.
///
/// Construction rules:
/// - The leaf list is padded up to the next power of two with `empty_leaf()`.
///   Padding never duplicates a real leaf, so `[a, b, c]` and `[a, b, c, c]`
///   commit to different roots.
/// - Internal nodes: blake3(0x01 || left || right).
/// - Single leaf: the root is the leaf itself (proof depth 0).
/// - Empty tree: `empty_root()`, and no proof exists for any index.
///
/// Proofs carry the original leaf count; verification recomputes the expected
/// depth from it and rejects proofs of any other length, and rejects indices
/// outside `0..leaf_count`.
use crate::evidence::Evidence;
use crate::types::{hash_bytes, Hash32, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const NODE_TAG: u8 = 0x01;
const STATE_LEAF_TAG: u8 = 0x00;

/// Root of a tree with no leaves.
pub fn empty_root() -> Hash32 {
    hash_bytes(b"")
}

/// Padding leaf used to fill the last level up to a power of two.
pub fn empty_leaf() -> Hash32 {
    hash_bytes(b"UNICRIUM_MERKLE_EMPTY_LEAF")
}

fn node_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    let mut h = blake3::Hasher::new();
    h.update(&[NODE_TAG]);
    h.update(&left.0);
    h.update(&right.0);
    Hash32(*h.finalize().as_bytes())
}

/// Number of siblings a proof over `leaf_count` leaves must carry.
pub fn proof_depth(leaf_count: u64) -> usize {
    if leaf_count <= 1 {
        0
    } else {
        (64 - (leaf_count - 1).leading_zeros()) as usize
    }
}

#[derive(Clone, Debug)]
pub struct MerkleTree {
    leaf_count: usize,
    /// `levels[0]` holds the padded leaves, the last level holds the root.
    levels: Vec<Vec<Hash32>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    pub leaf_count: u64,
    /// Sibling hashes from the leaf level upwards.
    pub siblings: Vec<Hash32>,
}

impl MerkleTree {
    pub fn build(leaves: &[Hash32]) -> Self {
        if leaves.is_empty() {
            return Self { leaf_count: 0, levels: Vec::new() };
        }
        let width = leaves.len().next_power_of_two();
        let mut level = Vec::with_capacity(width);
        level.extend_from_slice(leaves);
        level.resize(width, empty_leaf());

        let mut levels = vec![level];
        while let Some(prev) = levels.last() {
            if prev.len() == 1 {
                break;
            }
            let next: Vec<Hash32> = prev.chunks(2).map(|p| node_hash(&p[0], &p[1])).collect();
            levels.push(next);
        }
        Self { leaf_count: leaves.len(), levels }
    }

    pub fn root(&self) -> Hash32 {
        self.levels
            .last()
            .and_then(|l| l.first().copied())
            .unwrap_or_else(empty_root)
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_count
    }

    /// `None` when `index` is outside `0..leaf_count`.
    pub fn proof(&self, index: usize) -> Option<MerkleProof> {
        if index >= self.leaf_count {
            return None;
        }
        let mut siblings = Vec::with_capacity(self.levels.len().saturating_sub(1));
        let mut idx = index;
        for level in &self.levels[..self.levels.len() - 1] {
            siblings.push(level[idx ^ 1]);
            idx >>= 1;
        }
        Some(MerkleProof { leaf_count: self.leaf_count as u64, siblings })
    }
}

pub fn build_tree(leaves: &[Hash32]) -> MerkleTree {
    MerkleTree::build(leaves)
}

pub fn merkle_root(leaves: &[Hash32]) -> Hash32 {
    MerkleTree::build(leaves).root()
}

pub fn build_proof(tree: &MerkleTree, index: usize) -> Option<MerkleProof> {
    tree.proof(index)
}

/// Total: malformed proofs return `false`, never panic.
pub fn verify_proof(root: &Hash32, leaf: &Hash32, proof: &MerkleProof, index: u64) -> bool {
    if proof.leaf_count == 0 || index >= proof.leaf_count {
        return false;
    }
    if proof.siblings.len() != proof_depth(proof.leaf_count) {
        return false;
    }
    let mut acc = *leaf;
    for (level, sib) in proof.siblings.iter().enumerate() {
        acc = if (index >> level) & 1 == 0 {
            node_hash(&acc, sib)
        } else {
            node_hash(sib, &acc)
        };
    }
    acc == *root
}

/// Commitment over a block's transactions, in block order.
pub fn tx_root(txs: &[Transaction]) -> Hash32 {
    let leaves: Vec<Hash32> = txs.iter().map(|t| t.hash()).collect();
    merkle_root(&leaves)
}

/// Commitment over a block's evidence list, in block order.
pub fn evidence_root(evidence: &[Evidence]) -> Hash32 {
    let leaves: Vec<Hash32> = evidence.iter().map(|e| e.id()).collect();
    merkle_root(&leaves)
}

fn state_leaf(key: &[u8], value: &[u8]) -> Hash32 {
    let mut h = blake3::Hasher::new();
    h.update(&[STATE_LEAF_TAG]);
    h.update(&(key.len() as u32).to_le_bytes());
    h.update(key);
    h.update(&(value.len() as u32).to_le_bytes());
    h.update(value);
    Hash32(*h.finalize().as_bytes())
}

/// Root over sorted key/value entries. Insertion order never matters because
/// the map iterates in key order.
pub fn state_merkle_root(kv: &BTreeMap<Vec<u8>, Vec<u8>>) -> Hash32 {
    let leaves: Vec<Hash32> = kv.iter().map(|(k, v)| state_leaf(k, v)).collect();
    merkle_root(&leaves)
}
