//! Finality votes, block proposal signing and the inbound message envelope.
//!
//! Sign bytes: `[domain: 4 bytes] [height: 8 bytes LE] [block hash: 32 bytes]`.
//! Domain tags keep a vote signature from ever verifying as a proposal
//! signature and the other way around.

use crate::crypto::ed25519::verify;
use crate::crypto::{CryptoError, PublicKeyBytes, SignatureBytes, Signer};
use crate::types::{hash_bytes, Address, Block, BlockHeader, Hash32, Height};
use serde::{Deserialize, Serialize};

const DOMAIN_PROPOSAL: [u8; 4] = *b"PROP";
const DOMAIN_VOTE: [u8; 4] = *b"FVOT";

pub fn proposal_sign_bytes(height: Height, block_hash: &Hash32) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 8 + 32);
    out.extend_from_slice(&DOMAIN_PROPOSAL);
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&block_hash.0);
    out
}

pub fn vote_sign_bytes(height: Height, block_hash: &Hash32) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + 8 + 32);
    out.extend_from_slice(&DOMAIN_VOTE);
    out.extend_from_slice(&height.to_le_bytes());
    out.extend_from_slice(&block_hash.0);
    out
}

/// Sign a header as its proposer.
pub fn sign_header<S: Signer + ?Sized>(signer: &S, header: &BlockHeader) -> SignatureBytes {
    signer.sign(&proposal_sign_bytes(header.height, &header.hash()))
}

pub fn verify_header_signature(header: &BlockHeader, sig: &SignatureBytes) -> Result<(), CryptoError> {
    verify(&header.proposer_pk, &proposal_sign_bytes(header.height, &header.hash()), sig)
}

/// A validator's signed statement that it accepts `block_hash` at `height`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter_pk: PublicKeyBytes,
    pub height: Height,
    pub block_hash: Hash32,
    pub signature: SignatureBytes,
}

impl Vote {
    pub fn sign<S: Signer + ?Sized>(signer: &S, height: Height, block_hash: Hash32) -> Self {
        Self {
            voter_pk: signer.public_key(),
            height,
            block_hash,
            signature: signer.sign(&vote_sign_bytes(height, &block_hash)),
        }
    }

    pub fn voter(&self) -> Address {
        self.voter_pk.address()
    }

    pub fn verify(&self) -> Result<(), CryptoError> {
        verify(&self.voter_pk, &vote_sign_bytes(self.height, &self.block_hash), &self.signature)
    }

    /// Content id; two votes with the same id are the same statement.
    pub fn id(&self) -> Hash32 {
        let mut buf = vote_sign_bytes(self.height, &self.block_hash);
        buf.extend_from_slice(&self.voter_pk.0);
        hash_bytes(&buf)
    }
}

/// Everything a peer can hand to the node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ConsensusMsg {
    Block(Block),
    Vote(Vote),
    Evidence(crate::evidence::Evidence),
}
