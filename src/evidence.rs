//! Equivocation evidence.
//!
//! Evidence is two conflicting signed artifacts from one validator at one
//! height. The pair is stored in canonical order, so the same two artifacts
//! always yield the same evidence id no matter which arrived first.

use crate::consensus::messages::{verify_header_signature, Vote};
use crate::types::{hash_bytes, Address, Hash32, Height, SignedHeader};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DOMAIN_EVIDENCE: &[u8] = b"UNICRIUM_EVD_V1";

#[derive(Debug, Error, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceError {
    #[error("artifact signature invalid")]
    BadSignature,
    #[error("artifacts signed by different validators")]
    DifferentSigners,
    #[error("artifacts are for different heights")]
    DifferentHeights,
    #[error("artifacts do not conflict")]
    NoConflict,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub enum EvidenceKind {
    DoubleVote,
    DoubleProposal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Evidence {
    DoubleVote { a: Vote, b: Vote },
    DoubleProposal { a: SignedHeader, b: SignedHeader },
}

impl Evidence {
    pub fn double_vote(x: Vote, y: Vote) -> Self {
        if x.id() <= y.id() {
            Evidence::DoubleVote { a: x, b: y }
        } else {
            Evidence::DoubleVote { a: y, b: x }
        }
    }

    pub fn double_proposal(x: SignedHeader, y: SignedHeader) -> Self {
        if x.hash() <= y.hash() {
            Evidence::DoubleProposal { a: x, b: y }
        } else {
            Evidence::DoubleProposal { a: y, b: x }
        }
    }

    pub fn kind(&self) -> EvidenceKind {
        match self {
            Evidence::DoubleVote { .. } => EvidenceKind::DoubleVote,
            Evidence::DoubleProposal { .. } => EvidenceKind::DoubleProposal,
        }
    }

    /// Canonical id: hash over the kind and both artifact ids, smaller first.
    pub fn id(&self) -> Hash32 {
        let (kind, x, y) = match self {
            Evidence::DoubleVote { a, b } => (0u8, a.id(), b.id()),
            Evidence::DoubleProposal { a, b } => (1u8, a.hash(), b.hash()),
        };
        let (lo, hi) = if x <= y { (x, y) } else { (y, x) };
        let mut buf = Vec::with_capacity(DOMAIN_EVIDENCE.len() + 1 + 64);
        buf.extend_from_slice(DOMAIN_EVIDENCE);
        buf.push(kind);
        buf.extend_from_slice(&lo.0);
        buf.extend_from_slice(&hi.0);
        hash_bytes(&buf)
    }

    pub fn offender(&self) -> Address {
        match self {
            Evidence::DoubleVote { a, .. } => a.voter(),
            Evidence::DoubleProposal { a, .. } => a.header.proposer(),
        }
    }

    pub fn height(&self) -> Height {
        match self {
            Evidence::DoubleVote { a, .. } => a.height,
            Evidence::DoubleProposal { a, .. } => a.header.height,
        }
    }

    /// Stateless check: both signatures valid, one signer, one height, and
    /// the two artifacts name different blocks.
    pub fn verify(&self) -> Result<(), EvidenceError> {
        match self {
            Evidence::DoubleVote { a, b } => {
                if a.voter_pk != b.voter_pk {
                    return Err(EvidenceError::DifferentSigners);
                }
                if a.height != b.height {
                    return Err(EvidenceError::DifferentHeights);
                }
                if a.block_hash == b.block_hash {
                    return Err(EvidenceError::NoConflict);
                }
                a.verify().map_err(|_| EvidenceError::BadSignature)?;
                b.verify().map_err(|_| EvidenceError::BadSignature)?;
            }
            Evidence::DoubleProposal { a, b } => {
                if a.header.proposer_pk != b.header.proposer_pk {
                    return Err(EvidenceError::DifferentSigners);
                }
                if a.header.height != b.header.height {
                    return Err(EvidenceError::DifferentHeights);
                }
                if a.hash() == b.hash() {
                    return Err(EvidenceError::NoConflict);
                }
                verify_header_signature(&a.header, &a.signature).map_err(|_| EvidenceError::BadSignature)?;
                verify_header_signature(&b.header, &b.signature).map_err(|_| EvidenceError::BadSignature)?;
            }
        }
        Ok(())
    }
}
