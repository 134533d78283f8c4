//! Canonical byte encodings for signed artifacts.
//!
//! Every encoding is a domain tag followed by fixed-width little-endian
//! integers and length-prefixed raw bytes. Nothing here goes through serde,
//! so hashes stay stable across serde and bincode versions.

use super::{Signer, SignatureBytes};
use crate::types::{BlockHeader, Transaction, TxKind};

const DOMAIN_TX: &[u8] = b"UNICRIUM_TX_V1";
const DOMAIN_HEADER: &[u8] = b"UNICRIUM_BLK_V1";

fn put_bytes(out: &mut Vec<u8>, b: &[u8]) {
    out.extend_from_slice(&(b.len() as u32).to_le_bytes());
    out.extend_from_slice(b);
}

/// Bytes the sender signs. The tx hash is the blake3 of these bytes.
pub fn tx_sign_bytes(tx: &Transaction) -> Vec<u8> {
    let mut out = Vec::with_capacity(DOMAIN_TX.len() + 128 + tx.memo.len());
    out.extend_from_slice(DOMAIN_TX);
    out.extend_from_slice(&tx.chain_id.to_le_bytes());
    put_bytes(&mut out, &tx.sender_pk.0);
    out.extend_from_slice(&tx.nonce.to_le_bytes());
    out.extend_from_slice(&tx.fee.to_le_bytes());
    out.extend_from_slice(&tx.gas_limit.to_le_bytes());
    out.push(tx.kind.tag());
    match &tx.kind {
        TxKind::Transfer { to, amount } => {
            out.extend_from_slice(&to.0);
            out.extend_from_slice(&amount.to_le_bytes());
        }
        TxKind::Stake { amount } | TxKind::Unstake { amount } => {
            out.extend_from_slice(&amount.to_le_bytes());
        }
        TxKind::Delegate { validator, amount } | TxKind::Undelegate { validator, amount } => {
            out.extend_from_slice(&validator.0);
            out.extend_from_slice(&amount.to_le_bytes());
        }
        TxKind::CreateValidator { amount, commission_bps } => {
            out.extend_from_slice(&amount.to_le_bytes());
            out.extend_from_slice(&commission_bps.to_le_bytes());
        }
        TxKind::EditValidator { commission_bps } => {
            out.extend_from_slice(&commission_bps.to_le_bytes());
        }
    }
    put_bytes(&mut out, &tx.memo);
    out
}

pub fn header_hash_bytes(h: &BlockHeader) -> Vec<u8> {
    let mut out = Vec::with_capacity(DOMAIN_HEADER.len() + 8 * 3 + 32 * 4 + 36);
    out.extend_from_slice(DOMAIN_HEADER);
    out.extend_from_slice(&h.height.to_le_bytes());
    out.extend_from_slice(&h.parent.0);
    out.extend_from_slice(&h.tx_root.0);
    out.extend_from_slice(&h.evidence_root.0);
    out.extend_from_slice(&h.state_root.0);
    out.extend_from_slice(&h.gas_used.to_le_bytes());
    put_bytes(&mut out, &h.proposer_pk.0);
    out.extend_from_slice(&h.timestamp.to_le_bytes());
    out
}

/// Fill in `sender_pk` and `signature` for `tx` using `signer`.
pub fn sign_tx<S: Signer + ?Sized>(signer: &S, mut tx: Transaction) -> Transaction {
    tx.sender_pk = signer.public_key();
    tx.signature = SignatureBytes::default();
    tx.signature = signer.sign(&tx_sign_bytes(&tx));
    tx
}
