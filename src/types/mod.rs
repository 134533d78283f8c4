use crate::crypto::tx::{header_hash_bytes, tx_sign_bytes};
use crate::crypto::{PublicKeyBytes, SignatureBytes};
use crate::evidence::Evidence;
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Height = u64;
pub type Amount = u64;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Hash32(pub [u8; 32]);

impl Hash32 {
    pub fn zero() -> Self { Self([0u8; 32]) }

    pub fn to_hex(&self) -> String { hex::encode(self.0) }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Hash32 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Account identifier: the first 20 bytes of `blake3(public_key)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn to_hex(&self) -> String { hex::encode(self.0) }

    pub fn from_hex(s: &str) -> Option<Self> {
        let bytes = hex::decode(s.trim_start_matches("0x")).ok()?;
        let arr: [u8; 20] = bytes.try_into().ok()?;
        Some(Self(arr))
    }

    /// Short form for log lines.
    pub fn short(&self) -> String { hex::encode(&self.0[..4]) }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

pub fn hash_bytes(b: &[u8]) -> Hash32 {
    Hash32(*blake3::hash(b).as_bytes())
}

/// Transaction payload variants. Every kind has its own validation and apply
/// rule in the ledger; there is no open-ended dispatch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxKind {
    Transfer { to: Address, amount: Amount },
    Stake { amount: Amount },
    Unstake { amount: Amount },
    /// Bond balance to another validator's voting power.
    Delegate { validator: Address, amount: Amount },
    /// Withdraw delegated stake through the unbonding queue.
    Undelegate { validator: Address, amount: Amount },
    /// Register the sender as a validator with an initial self-stake.
    CreateValidator { amount: Amount, commission_bps: u16 },
    EditValidator { commission_bps: u16 },
}

impl TxKind {
    pub fn tag(&self) -> u8 {
        match self {
            TxKind::Transfer { .. } => 0x01,
            TxKind::Stake { .. } => 0x02,
            TxKind::Unstake { .. } => 0x03,
            TxKind::Delegate { .. } => 0x04,
            TxKind::Undelegate { .. } => 0x05,
            TxKind::CreateValidator { .. } => 0x06,
            TxKind::EditValidator { .. } => 0x07,
        }
    }

    pub fn amount(&self) -> Amount {
        match self {
            TxKind::Transfer { amount, .. }
            | TxKind::Stake { amount }
            | TxKind::Unstake { amount }
            | TxKind::Delegate { amount, .. }
            | TxKind::Undelegate { amount, .. }
            | TxKind::CreateValidator { amount, .. } => *amount,
            TxKind::EditValidator { .. } => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub chain_id: u64,
    pub sender_pk: PublicKeyBytes,
    pub nonce: u64,
    /// Flat fee paid into the block fee pool.
    pub fee: Amount,
    /// Gas allowance; must cover `GasSchedule::estimate_cost`.
    pub gas_limit: u64,
    pub kind: TxKind,
    #[serde(default)]
    pub memo: Vec<u8>,
    pub signature: SignatureBytes,
}

impl Transaction {
    pub fn sender(&self) -> Address {
        self.sender_pk.address()
    }

    pub fn hash(&self) -> Hash32 {
        tx_hash(self)
    }
}

/// Deterministic tx hash over the signed content (signature excluded).
pub fn tx_hash(tx: &Transaction) -> Hash32 {
    hash_bytes(&tx_sign_bytes(tx))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub height: Height,
    pub parent: Hash32,
    pub tx_root: Hash32,
    pub evidence_root: Hash32,
    pub state_root: Hash32,
    pub gas_used: u64,
    pub proposer_pk: PublicKeyBytes,
    /// Unix seconds, supplied by the proposer. Must not go backwards.
    pub timestamp: u64,
}

impl BlockHeader {
    /// Block hash. Covers every header field and never the proposer signature,
    /// so the signature can sign the hash.
    pub fn hash(&self) -> Hash32 {
        hash_bytes(&header_hash_bytes(self))
    }

    pub fn proposer(&self) -> Address {
        self.proposer_pk.address()
    }
}

/// A header together with the proposer's signature over its hash. This is the
/// artifact double-proposal evidence is built from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHeader {
    pub header: BlockHeader,
    pub signature: SignatureBytes,
}

impl SignedHeader {
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub signature: SignatureBytes,
    pub txs: Vec<Transaction>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

impl Block {
    pub fn hash(&self) -> Hash32 {
        self.header.hash()
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    pub fn signed_header(&self) -> SignedHeader {
        SignedHeader { header: self.header.clone(), signature: self.signature.clone() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: Hash32,
    pub gas_used: u64,
    pub fee: Amount,
}
