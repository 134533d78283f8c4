//! Stake-weighted proposer selection over many heights.

use unicrium::consensus::validator_set::{proposer_seed, select_proposer, Validator, ValidatorSet};
use unicrium::crypto::ed25519::Ed25519Keypair;
use unicrium::crypto::Signer;
use unicrium::types::{hash_bytes, Height};

fn validator(label: &str, power: u64) -> Validator {
    let k = Ed25519Keypair::from_label(label);
    Validator { address: k.address(), pk: k.public_key(), power }
}

#[test]
fn selection_tracks_stake() {
    let a = validator("pos-a", 200);
    let b = validator("pos-b", 100);
    let set = ValidatorSet::new(1, vec![b.clone(), a.clone()]);
    assert_eq!(set.total_power(), 300);

    let rounds: Height = 10_000;
    let mut a_wins = 0u64;
    for h in 1..=rounds {
        let parent = hash_bytes(&h.to_le_bytes());
        let seed = proposer_seed(&parent, h);
        let picked = select_proposer(&set, h, &seed).unwrap();
        if picked.address == a.address {
            a_wins += 1;
        } else {
            assert_eq!(picked.address, b.address);
        }
    }
    let share = a_wins as f64 / rounds as f64;
    assert!((0.64..0.69).contains(&share), "A picked {share:.3} of the time");
}

#[test]
fn zero_power_is_never_selected() {
    let a = validator("pos-a", 5);
    let z = validator("pos-z", 0);
    let set = ValidatorSet::new(1, vec![a.clone(), z]);
    assert_eq!(set.len(), 1);
    for h in 1..200u64 {
        let seed = proposer_seed(&hash_bytes(&h.to_be_bytes()), h);
        assert_eq!(select_proposer(&set, h, &seed).unwrap().address, a.address);
    }
    let empty = ValidatorSet::new(1, Vec::new());
    assert!(select_proposer(&empty, 1, &hash_bytes(b"s")).is_none());
}

#[test]
fn canonical_order_ignores_input_order() {
    let vals = vec![validator("pos-a", 7), validator("pos-b", 7), validator("pos-c", 9)];
    let mut rev = vals.clone();
    rev.reverse();
    let x = ValidatorSet::new(3, vals);
    let y = ValidatorSet::new(3, rev);
    assert_eq!(x, y);
    assert_eq!(x.hash(), y.hash());
    assert_eq!(x.vals[0].power, 9);
}
