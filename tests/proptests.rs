use proptest::prelude::*;

use std::collections::BTreeMap;
use unicrium::merkle::{build_proof, build_tree, merkle_root, state_merkle_root, verify_proof};
use unicrium::types::{hash_bytes, Hash32};

fn arb_leaves() -> impl Strategy<Value = Vec<Hash32>> {
    proptest::collection::vec(any::<[u8; 32]>().prop_map(Hash32), 1..70)
}

fn flip(h: &Hash32, bit: usize) -> Hash32 {
    let mut out = *h;
    out.0[(bit / 8) % 32] ^= 1 << (bit % 8);
    out
}

proptest! {
    #[test]
    fn every_leaf_proves(leaves in arb_leaves()) {
        let tree = build_tree(&leaves);
        let root = tree.root();
        for (i, leaf) in leaves.iter().enumerate() {
            let proof = build_proof(&tree, i).unwrap();
            prop_assert!(verify_proof(&root, leaf, &proof, i as u64));
        }
        prop_assert!(build_proof(&tree, leaves.len()).is_none());
    }

    #[test]
    fn flipped_leaf_fails(leaves in arb_leaves(), pick in any::<usize>(), bit in 0usize..256) {
        let i = pick % leaves.len();
        let tree = build_tree(&leaves);
        let proof = build_proof(&tree, i).unwrap();
        prop_assert!(!verify_proof(&tree.root(), &flip(&leaves[i], bit), &proof, i as u64));
    }

    #[test]
    fn flipped_sibling_fails(leaves in arb_leaves(), pick in any::<usize>(), which in any::<usize>(), bit in 0usize..256) {
        prop_assume!(leaves.len() > 1);
        let i = pick % leaves.len();
        let tree = build_tree(&leaves);
        let mut proof = build_proof(&tree, i).unwrap();
        let s = which % proof.siblings.len();
        proof.siblings[s] = flip(&proof.siblings[s], bit);
        prop_assert!(!verify_proof(&tree.root(), &leaves[i], &proof, i as u64));
    }

    #[test]
    fn wrong_index_or_root_fails(leaves in arb_leaves(), pick in any::<usize>(), bit in 0usize..256) {
        prop_assume!(leaves.len() > 1);
        let i = pick % leaves.len();
        let tree = build_tree(&leaves);
        let proof = build_proof(&tree, i).unwrap();
        let other = (i + 1) % leaves.len();
        prop_assert!(!verify_proof(&tree.root(), &leaves[i], &proof, other as u64));
        prop_assert!(!verify_proof(&flip(&tree.root(), bit), &leaves[i], &proof, i as u64));
    }

    #[test]
    fn truncated_proof_fails(leaves in arb_leaves(), pick in any::<usize>()) {
        prop_assume!(leaves.len() > 1);
        let i = pick % leaves.len();
        let tree = build_tree(&leaves);
        let mut proof = build_proof(&tree, i).unwrap();
        proof.siblings.pop();
        prop_assert!(!verify_proof(&tree.root(), &leaves[i], &proof, i as u64));
    }

    #[test]
    fn padding_never_collides_with_duplicated_leaf(leaves in arb_leaves()) {
        prop_assume!(!leaves.len().is_power_of_two());
        let mut padded = leaves.clone();
        padded.push(*leaves.last().unwrap());
        prop_assert_ne!(merkle_root(&leaves), merkle_root(&padded));
    }

    #[test]
    fn state_root_ignores_insertion_order(entries in proptest::collection::vec((any::<u16>(), any::<u64>()), 0..40)) {
        let mut forward = BTreeMap::new();
        for (k, v) in &entries {
            forward.insert(k.to_be_bytes().to_vec(), v.to_le_bytes().to_vec());
        }
        let mut backward = BTreeMap::new();
        for (k, _) in entries.iter().rev() {
            backward.insert(k.to_be_bytes().to_vec(), forward[&k.to_be_bytes().to_vec()].clone());
        }
        prop_assert_eq!(state_merkle_root(&forward), state_merkle_root(&backward));
    }

    #[test]
    fn hash_bytes_is_deterministic(data in proptest::collection::vec(any::<u8>(), 0..4096)) {
        let h1 = hash_bytes(&data);
        let h2 = hash_bytes(&data);
        prop_assert_eq!(h1.0, h2.0);
    }
}
