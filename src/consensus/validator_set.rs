use crate::crypto::PublicKeyBytes;
use crate::types::{hash_bytes, Address, Hash32, Height};
use serde::{Deserialize, Serialize};

pub type VotingPower = u64;

const DOMAIN_SEED: &[u8] = b"UNICRIUM_PROPOSER_SEED";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    pub address: Address,
    pub pk: PublicKeyBytes,
    pub power: VotingPower,
}

/// Immutable validator snapshot for one height.
///
/// `vals` is kept in canonical order (power descending, address ascending)
/// with zero-power entries dropped; proposer selection walks this order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorSet {
    pub height: Height,
    pub vals: Vec<Validator>,
}

impl ValidatorSet {
    pub fn new(height: Height, mut vals: Vec<Validator>) -> Self {
        vals.retain(|v| v.power > 0);
        vals.sort_by(|a, b| b.power.cmp(&a.power).then_with(|| a.address.cmp(&b.address)));
        Self { height, vals }
    }

    pub fn total_power(&self) -> VotingPower {
        self.vals.iter().fold(0u64, |acc, v| acc.saturating_add(v.power))
    }

    pub fn get(&self, addr: &Address) -> Option<&Validator> {
        self.vals.iter().find(|v| &v.address == addr)
    }

    pub fn power_of(&self, addr: &Address) -> VotingPower {
        self.get(addr).map(|v| v.power).unwrap_or(0)
    }

    pub fn contains(&self, addr: &Address) -> bool {
        self.power_of(addr) > 0
    }

    pub fn len(&self) -> usize {
        self.vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    /// Deterministic hash binding the snapshot contents.
    pub fn hash(&self) -> Hash32 {
        let mut buf = Vec::with_capacity(8 + self.vals.len() * 60);
        buf.extend_from_slice(&self.height.to_le_bytes());
        for v in &self.vals {
            buf.extend_from_slice(&v.address.0);
            buf.extend_from_slice(&v.power.to_le_bytes());
        }
        hash_bytes(&buf)
    }
}

/// Selection seed for `height`, derived only from the parent hash.
pub fn proposer_seed(parent: &Hash32, height: Height) -> Hash32 {
    let mut buf = Vec::with_capacity(DOMAIN_SEED.len() + 32 + 8);
    buf.extend_from_slice(DOMAIN_SEED);
    buf.extend_from_slice(&parent.0);
    buf.extend_from_slice(&height.to_le_bytes());
    hash_bytes(&buf)
}

/// Stake-weighted pick. Every node computing this from the same snapshot,
/// height and seed gets the same validator. `None` for an empty set.
pub fn select_proposer<'a>(set: &'a ValidatorSet, height: Height, seed: &Hash32) -> Option<&'a Validator> {
    let total = set.total_power() as u128;
    if total == 0 {
        return None;
    }
    let mut buf = [0u8; 40];
    buf[..32].copy_from_slice(&seed.0);
    buf[32..].copy_from_slice(&height.to_le_bytes());
    let h = blake3::hash(&buf);
    let mut first = [0u8; 16];
    first.copy_from_slice(&h.as_bytes()[..16]);
    let mut draw = u128::from_le_bytes(first) % total;

    for v in &set.vals {
        let p = v.power as u128;
        if draw < p {
            return Some(v);
        }
        draw -= p;
    }
    set.vals.last()
}
